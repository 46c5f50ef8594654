use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(VisitStatus {
    Scheduled => "scheduled",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
    NotRealized => "not_realized",
});

str_enum!(EntityType {
    Visit => "visit",
    Hospital => "hospital",
    VoiceNote => "voice_note",
    GpsTrack => "gps_track",
});

str_enum!(OutboxAction {
    Create => "create",
    Update => "update",
    Delete => "delete",
});

impl VisitStatus {
    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::NotRealized)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: VisitStatus) -> bool {
        use VisitStatus::*;
        matches!(
            (*self, next),
            (Scheduled, InProgress)
                | (InProgress, Completed)
                | (Scheduled, Cancelled)
                | (InProgress, Cancelled)
                | (Scheduled, NotRealized)
                | (InProgress, NotRealized)
        )
    }
}

impl EntityType {
    /// Actions the remote API accepts for this entity type.
    pub fn supports(&self, action: OutboxAction) -> bool {
        match self {
            Self::Visit => true,
            Self::Hospital => matches!(action, OutboxAction::Create | OutboxAction::Update),
            Self::VoiceNote | Self::GpsTrack => action == OutboxAction::Create,
        }
    }

    /// Local table holding entities of this type. GPS batches have no `synced` flag.
    pub(crate) fn synced_table(&self) -> Option<&'static str> {
        match self {
            Self::Visit => Some("visit_events"),
            Self::Hospital => Some("hospitals"),
            Self::VoiceNote => Some("voice_notes"),
            Self::GpsTrack => None,
        }
    }
}
