//! Static catalog data: default habits, leadership attributes, workout plan,
//! and the storage keys everything else reads and writes.

use serde::{Deserialize, Serialize};

pub const HABITS_KEY: &str = "def-habits";
pub const COMPLETIONS_KEY: &str = "def-completions";
pub const SCORES_KEY: &str = "def-scores";
pub const TASKS_KEY_PREFIX: &str = "def-tasks-";
pub const WORKOUT_LAST_DAY_KEY: &str = "def-workouts-last-completed-day";
pub const CREDENTIAL_KEY: &str = "openrouter_api_key";
pub const DAILY_MESSAGE_KEY: &str = "jocko_daily_message";
pub const DAILY_LAST_KEY: &str = "jocko_daily_last";

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_custom: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadershipAttribute {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

const DEFAULT_HABITS: [(&str, &str, &str, &str); 8] = [
    (
        "up-before-enemy",
        "Up before the enemy",
        "Sunrise",
        "Wake up early (without snooze) at your designated time to accomplish something before the day starts.",
    ),
    (
        "get-after-it",
        "Get after it",
        "Dumbbell",
        "Complete some form of physical activity or workout each day.",
    ),
    (
        "prioritize-execute",
        "Prioritize & execute",
        "CheckSquare",
        "Write and complete your top 3 daily tasks.",
    ),
    (
        "hydrate-die",
        "Hydrate or die",
        "Droplets",
        "Drink your predetermined daily water intake goal.",
    ),
    (
        "clean-fuel",
        "Clean fuel",
        "Apple",
        "Stick to your predetermined healthy eating plan.",
    ),
    (
        "no-sugarcoated-lies",
        "No sugarcoated lies",
        "X",
        "Avoid junk food and blatant sugar intake.",
    ),
    (
        "back-to-book",
        "Back to the book",
        "BookOpen",
        "Spend at least 20 minutes on personal development daily.",
    ),
    (
        "remember",
        "Remember",
        "Brain",
        "Take time daily to reflect on gratitude and blessings.",
    ),
];

pub const LEADERSHIP_ATTRIBUTES: [LeadershipAttribute; 10] = [
    LeadershipAttribute {
        key: "extreme-ownership",
        name: "EXTREME OWNERSHIP",
        description: "Taking full responsibility for team outcomes, including failures, without blaming others or external factors.",
    },
    LeadershipAttribute {
        key: "discipline-equals-freedom",
        name: "DISCIPLINE EQUALS FREEDOM",
        description: "Maintaining consistent discipline in planning, execution, and self-control to create flexibility and opportunities.",
    },
    LeadershipAttribute {
        key: "lead-up-and-down-the-chain",
        name: "LEAD UP AND DOWN THE CHAIN",
        description: "Building trust and communicating effectively with both subordinates and superiors to align goals.",
    },
    LeadershipAttribute {
        key: "decentralized-command",
        name: "DECENTRALIZED COMMAND",
        description: "Empowering team members to make decisions by clearly defining the mission and intent, without micromanaging.",
    },
    LeadershipAttribute {
        key: "prioritize-and-execute",
        name: "PRIORITIZE AND EXECUTE",
        description: "Focusing on the most critical task first, assessing, deciding, and acting decisively under pressure.",
    },
    LeadershipAttribute {
        key: "dichotomy-of-leadership",
        name: "DICHOTOMY OF LEADERSHIP",
        description: "Balancing competing demands, such as confidence vs. humility, or aggression vs. restraint.",
    },
    LeadershipAttribute {
        key: "build-relationships-and-trust",
        name: "BUILD RELATIONSHIPS AND TRUST",
        description: "Fostering mutual trust and respect through listening, valuing input, and promoting accountability.",
    },
    LeadershipAttribute {
        key: "simplify-and-clarify",
        name: "SIMPLIFY AND CLARIFY",
        description: "Breaking down strategies into clear, concise directives to ensure understanding and alignment.",
    },
    LeadershipAttribute {
        key: "ego-management",
        name: "EGO MANAGEMENT",
        description: "Checking personal and team egos to prioritize the mission and teamwork over individual pride.",
    },
    LeadershipAttribute {
        key: "adapt-and-overcome",
        name: "ADAPT AND OVERCOME",
        description: "Adjusting plans dynamically when circumstances change, staying calm and pivoting decisively.",
    },
];

pub fn default_habits() -> Vec<Habit> {
    DEFAULT_HABITS
        .iter()
        .map(|(id, name, icon, description)| Habit {
            id: id.to_string(),
            name: name.to_string(),
            icon: icon.to_string(),
            description: description.to_string(),
            is_custom: false,
        })
        .collect()
}

pub fn is_leadership_attribute(key: &str) -> bool {
    LEADERSHIP_ATTRIBUTES.iter().any(|attr| attr.key == key)
}

/// Rep counts for one day of the progressive workout program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutCounts {
    pub day: u32,
    pub pushups: u32,
    pub crunches: u32,
    pub plank_seconds: u32,
}

pub fn workout_counts_for_day(day: u32) -> WorkoutCounts {
    WorkoutCounts {
        day,
        pushups: 8 + day,
        crunches: 18 + day,
        plank_seconds: 28 + day,
    }
}

pub fn tasks_key(date: &str) -> String {
    format!("{}{}", TASKS_KEY_PREFIX, date)
}
