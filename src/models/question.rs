use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub text: String,
    #[serde(default = "default_marks")]
    pub marks: i32,
    pub explanation: Option<String>,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

fn default_marks() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    Mcq {
        options: Vec<String>,
        correct_option: usize,
    },
    Descriptive {
        #[serde(default)]
        model_answer: Option<String>,
    },
}

impl QuestionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            QuestionKind::Mcq { .. } => "mcq",
            QuestionKind::Descriptive { .. } => "descriptive",
        }
    }

    pub fn options(&self) -> &[String] {
        match self {
            QuestionKind::Mcq { options, .. } => options,
            QuestionKind::Descriptive { .. } => &[],
        }
    }
}
