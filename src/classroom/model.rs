use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ClassroomError, Result};

pub type ParticipantId = String;
pub type AnnotationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Instructor,
    Student,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    /// Page the participant is on while sync is off
    #[serde(rename = "currentPage", default, skip_serializing_if = "Option::is_none")]
    pub current_page_override: Option<u32>,
}

impl Participant {
    pub fn new(id: ParticipantId, role: Role, name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            role,
            joined_at: now,
            last_seen_at: now,
            current_page_override: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Pin,
    Laser,
    Circle,
    Rect,
    Pen,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Geometry of an annotation, in percent of the page size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnnotationData {
    Pin {
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    Circle {
        cx: f64,
        cy: f64,
        radius: f64,
        stroke_width: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fill: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        stroke_width: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fill: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    Pen {
        points: Vec<Point>,
        stroke_width: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        smoothing: Option<bool>,
    },
    Laser {
        x: f64,
        y: f64,
        timestamp: i64,
    },
}

impl AnnotationData {
    pub fn kind(&self) -> AnnotationKind {
        match self {
            AnnotationData::Pin { .. } => AnnotationKind::Pin,
            AnnotationData::Circle { .. } => AnnotationKind::Circle,
            AnnotationData::Rect { .. } => AnnotationKind::Rect,
            AnnotationData::Pen { .. } => AnnotationKind::Pen,
            AnnotationData::Laser { .. } => AnnotationKind::Laser,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            AnnotationData::Pin { x, y, size, .. } => {
                percent("x", *x)?;
                percent("y", *y)?;
                if let Some(size) = size {
                    positive("size", *size)?;
                }
            }
            AnnotationData::Circle { cx, cy, radius, stroke_width, .. } => {
                percent("cx", *cx)?;
                percent("cy", *cy)?;
                percent("radius", *radius)?;
                positive("strokeWidth", *stroke_width)?;
            }
            AnnotationData::Rect { x, y, width, height, stroke_width, .. } => {
                percent("x", *x)?;
                percent("y", *y)?;
                percent("width", *width)?;
                percent("height", *height)?;
                positive("strokeWidth", *stroke_width)?;
            }
            AnnotationData::Pen { points, stroke_width, .. } => {
                if points.is_empty() {
                    return Err(ClassroomError::validation("pen stroke has no points"));
                }
                for point in points {
                    percent("points.x", point.x)?;
                    percent("points.y", point.y)?;
                }
                positive("strokeWidth", *stroke_width)?;
            }
            AnnotationData::Laser { x, y, .. } => {
                percent("x", *x)?;
                percent("y", *y)?;
            }
        }
        Ok(())
    }
}

fn percent(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ClassroomError::validation(format!("{field} must be within 0..=100, got {value}")))
    }
}

fn positive(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ClassroomError::validation(format!("{field} must be positive, got {value}")))
    }
}

/// Checks a page number against the bound material.
pub fn check_page(page: u32, total_pages: u32) -> Result<()> {
    if (1..=total_pages).contains(&page) {
        Ok(())
    } else {
        Err(ClassroomError::PageOutOfRange { page, total_pages })
    }
}

/// Annotation as submitted by the instructor, before the server assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationDraft {
    pub page_number: u32,
    #[serde(rename = "type")]
    pub kind: AnnotationKind,
    pub data: AnnotationData,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary: Option<bool>,
}

impl AnnotationDraft {
    pub fn validate(&self, total_pages: u32) -> Result<()> {
        check_page(self.page_number, total_pages)?;
        if self.kind != self.data.kind() {
            return Err(ClassroomError::validation(format!(
                "annotation type {:?} does not match payload type {:?}",
                self.kind,
                self.data.kind()
            )));
        }
        if self.color.trim().is_empty() {
            return Err(ClassroomError::validation("annotation color is empty"));
        }
        self.data.validate()
    }

    /// Laser strokes are pointer gestures and expire unless told otherwise.
    pub fn is_temporary(&self) -> bool {
        self.temporary.unwrap_or(self.kind == AnnotationKind::Laser)
    }

    pub fn into_annotation(self, id: AnnotationId) -> Annotation {
        let temporary = self.is_temporary();
        Annotation {
            id,
            page_number: self.page_number,
            kind: self.kind,
            data: self.data,
            color: self.color,
            created_at: Utc::now(),
            temporary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: AnnotationId,
    pub page_number: u32,
    #[serde(rename = "type")]
    pub kind: AnnotationKind,
    pub data: AnnotationData,
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub temporary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportantPoint {
    pub id: String,
    pub title: String,
    pub points: Vec<String>,
    pub displayed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn laser_draft(page: u32) -> AnnotationDraft {
        AnnotationDraft {
            page_number: page,
            kind: AnnotationKind::Laser,
            data: AnnotationData::Laser { x: 50.0, y: 40.0, timestamp: 0 },
            color: "#ff0000".to_string(),
            temporary: None,
        }
    }

    #[test]
    fn test_draft_deserializes_from_wire_shape() {
        let draft: AnnotationDraft = serde_json::from_value(json!({
            "pageNumber": 2,
            "type": "circle",
            "data": {"type": "circle", "cx": 10.0, "cy": 20.0, "radius": 5.0, "strokeWidth": 2.0},
            "color": "blue",
            "temporary": false
        }))
        .unwrap();

        assert_eq!(draft.page_number, 2);
        assert_eq!(draft.kind, AnnotationKind::Circle);
        assert!(matches!(draft.data, AnnotationData::Circle { radius, .. } if radius == 5.0));
        assert!(draft.validate(9).is_ok());
    }

    #[test]
    fn test_page_out_of_range() {
        assert!(matches!(
            laser_draft(10).validate(9),
            Err(ClassroomError::PageOutOfRange { page: 10, total_pages: 9 })
        ));
        assert!(laser_draft(0).validate(9).is_err());
        assert!(laser_draft(9).validate(9).is_ok());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut draft = laser_draft(1);
        draft.kind = AnnotationKind::Pin;
        assert!(matches!(draft.validate(9), Err(ClassroomError::Validation(_))));
    }

    #[test]
    fn test_coordinates_must_be_percentages() {
        let mut draft = laser_draft(1);
        draft.data = AnnotationData::Laser { x: 120.0, y: 40.0, timestamp: 0 };
        assert!(draft.validate(9).is_err());

        draft.data = AnnotationData::Laser { x: f64::NAN, y: 40.0, timestamp: 0 };
        assert!(draft.validate(9).is_err());
    }

    #[test]
    fn test_empty_pen_rejected() {
        let draft = AnnotationDraft {
            page_number: 1,
            kind: AnnotationKind::Pen,
            data: AnnotationData::Pen { points: vec![], stroke_width: 2.0, smoothing: None },
            color: "black".to_string(),
            temporary: None,
        };
        assert!(draft.validate(3).is_err());
    }

    #[test]
    fn test_empty_color_rejected() {
        let mut draft = laser_draft(1);
        draft.color = "  ".to_string();
        assert!(draft.validate(3).is_err());
    }

    #[test]
    fn test_laser_defaults_to_temporary() {
        assert!(laser_draft(1).is_temporary());

        let mut draft = laser_draft(1);
        draft.temporary = Some(false);
        assert!(!draft.is_temporary());

        let pin = AnnotationDraft {
            page_number: 1,
            kind: AnnotationKind::Pin,
            data: AnnotationData::Pin { x: 1.0, y: 1.0, label: None, size: None },
            color: "red".to_string(),
            temporary: None,
        };
        assert!(!pin.is_temporary());
    }

    #[test]
    fn test_annotation_serialization() {
        let annotation = laser_draft(3).into_annotation("ann_1".to_string());
        let value = serde_json::to_value(&annotation).unwrap();
        assert_eq!(value["id"], "ann_1");
        assert_eq!(value["pageNumber"], 3);
        assert_eq!(value["type"], "laser");
        assert_eq!(value["data"]["type"], "laser");
        assert_eq!(value["temporary"], true);
    }

    #[test]
    fn test_participant_serialization() {
        let mut participant = Participant::new("p1".to_string(), Role::Student, None);
        participant.current_page_override = Some(4);
        let value = serde_json::to_value(&participant).unwrap();
        assert_eq!(value["role"], "student");
        assert_eq!(value["currentPage"], 4);
        assert!(value.get("name").is_none());
    }
}
