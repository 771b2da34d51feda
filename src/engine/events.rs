use serde::{Deserialize, Serialize};

use crate::scenario::Category;

/// Event kinds a round can roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DirectKill,
    #[serde(rename = "self")]
    SelfInflicted,
    Environmental,
    Group,
    Story,
    NonLethalStory,
    ExtraLethal,
    Comeback,
}

/// Pool mutation applied after an event is logged. Indices refer to the
/// participants in draw order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Kill { killer: usize, victim: usize },
    Eliminate(&'static [usize]),
    Revive(usize),
    Nothing,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::DirectKill,
        EventType::SelfInflicted,
        EventType::Environmental,
        EventType::Group,
        EventType::Story,
        EventType::NonLethalStory,
        EventType::ExtraLethal,
        EventType::Comeback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DirectKill => "direct_kill",
            EventType::SelfInflicted => "self",
            EventType::Environmental => "environmental",
            EventType::Group => "group",
            EventType::Story => "story",
            EventType::NonLethalStory => "non_lethal_story",
            EventType::ExtraLethal => "extra_lethal",
            EventType::Comeback => "comeback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == s)
    }

    /// Scenario categories this event draws from. More than one entry means
    /// the category is picked uniformly per occurrence.
    pub fn categories(&self) -> &'static [Category] {
        match self {
            EventType::DirectKill => &[Category::DirectKill],
            EventType::SelfInflicted => &[Category::SelfInflicted],
            EventType::Environmental => &[Category::Environmental],
            EventType::Group => &[Category::Group],
            EventType::Story | EventType::NonLethalStory => &[Category::Story],
            EventType::ExtraLethal => &[Category::DirectKill, Category::Environmental],
            EventType::Comeback => &[Category::Comeback],
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            EventType::DirectKill => Effect::Kill { killer: 0, victim: 1 },
            EventType::SelfInflicted | EventType::Environmental | EventType::ExtraLethal => {
                Effect::Eliminate(&[0])
            }
            EventType::Group => Effect::Eliminate(&[0, 1]),
            EventType::Comeback => Effect::Revive(0),
            EventType::Story | EventType::NonLethalStory => Effect::Nothing,
        }
    }

    /// Participants come from the dead pool instead of the alive pool.
    pub fn draws_from_dead(&self) -> bool {
        matches!(self, EventType::Comeback)
    }

    pub fn is_lethal(&self) -> bool {
        matches!(self.effect(), Effect::Kill { .. } | Effect::Eliminate(_))
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
