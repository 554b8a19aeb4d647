/// Outbound effect: a pure description of what the presentation layer should
/// render. No rendering happens in the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    AskName,
    ShowLevelMenu,
    ShowTopicMenu {
        level: String,
    },
    ShowQuestion {
        text: String,
        /// Options in display order; each keeps its original index so the
        /// answer token is shuffle-independent.
        options: Vec<DisplayOption>,
        index: usize,
        total: usize,
        media: Option<String>,
    },
    ShowAnswerFeedback {
        correct: bool,
    },
    ShowReport {
        score: usize,
        total: usize,
        items: Vec<ReportItem>,
    },
    ShowNotice {
        kind: NoticeKind,
        text: String,
    },
    UpdateSummarySurface {
        user_id: u64,
        text: String,
    },
    AskFeedback,
    AckFeedback,
    ForwardFeedback {
        user_id: u64,
        text: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Stale,
    NoQuestions,
    InvalidInput,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayOption {
    pub original_index: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportItem {
    pub number: usize,
    pub was_correct: bool,
    pub question: String,
    pub correct_option: String,
}
