use serde::{Deserialize, Serialize};

use crate::model::db::position::{NewPosition, Position};

use super::{
    field::{self, FieldError},
    id::ApiId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSpec {
    pub name: String,
}

impl TryFrom<PositionSpec> for NewPosition {
    type Error = FieldError;

    fn try_from(spec: PositionSpec) -> Result<Self, Self::Error> {
        Ok(Self {
            name: field::name("name", &spec.name)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDescription {
    pub id: ApiId,
    pub name: String,
}

impl From<Position> for PositionDescription {
    fn from(position: Position) -> Self {
        Self {
            id: position.id.into(),
            name: position.position.name,
        }
    }
}
