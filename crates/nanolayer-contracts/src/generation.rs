use crate::prompts::{BASE_TASK_LABEL, SPLIT_TASK_LABEL};

/// Which operation, if any, the studio currently has in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StudioPhase {
    #[default]
    Idle,
    GeneratingBase,
    SplittingLayers,
}

impl StudioPhase {
    pub fn task_label(self) -> Option<&'static str> {
        match self {
            Self::Idle => None,
            Self::GeneratingBase => Some(BASE_TASK_LABEL),
            Self::SplittingLayers => Some(SPLIT_TASK_LABEL),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::GeneratingBase => "generating_base",
            Self::SplittingLayers => "splitting_layers",
        }
    }
}

/// Busy flag plus task label, derived from a single phase so the two can
/// never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenerationState {
    phase: StudioPhase,
}

impl GenerationState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> StudioPhase {
        self.phase
    }

    pub fn is_generating(&self) -> bool {
        self.phase != StudioPhase::Idle
    }

    pub fn is_splitting(&self) -> bool {
        self.phase == StudioPhase::SplittingLayers
    }

    pub fn current_task(&self) -> Option<&'static str> {
        self.phase.task_label()
    }

    /// Enters `phase` if nothing is in flight. Returns false when busy.
    pub fn try_begin(&mut self, phase: StudioPhase) -> bool {
        if self.is_generating() || phase == StudioPhase::Idle {
            return false;
        }
        self.phase = phase;
        true
    }

    pub fn finish(&mut self) {
        self.phase = StudioPhase::Idle;
    }
}
