use tracing::debug;

/// Progress of a single transfer.
///
/// `Rejected` is only reachable before `Debiting`. From `Debiting` on, the
/// transfer either reaches `Completed` or its unit of work is rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    #[default]
    Validating,
    Checking,
    Debiting,
    Crediting,
    Recording,
    Completed,
    Rejected,
}

impl TransferState {
    pub fn can_advance_to(self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Validating, Checking)
                | (Checking, Debiting)
                | (Debiting, Crediting)
                | (Crediting, Recording)
                | (Recording, Completed)
                | (Validating | Checking, Rejected)
        )
    }

    /// Inside the all-or-nothing part of the transfer.
    pub fn is_committing(self) -> bool {
        matches!(
            self,
            TransferState::Debiting | TransferState::Crediting | TransferState::Recording
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Rejected)
    }

    pub(crate) fn advance(&mut self, next: TransferState) {
        debug_assert!(
            self.can_advance_to(next),
            "illegal transfer state change {self:?} -> {next:?}"
        );
        debug!(from = ?*self, to = ?next, "transfer state");
        *self = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransferState::*;

    #[test]
    fn happy_path_is_linear() {
        let mut state = TransferState::default();
        for next in [Checking, Debiting, Crediting, Recording, Completed] {
            state.advance(next);
        }
        assert_eq!(state, Completed);
        assert!(state.is_terminal());
    }

    #[test]
    fn rejection_only_before_debiting() {
        assert!(Validating.can_advance_to(Rejected));
        assert!(Checking.can_advance_to(Rejected));
        assert!(!Debiting.can_advance_to(Rejected));
        assert!(!Crediting.can_advance_to(Rejected));
        assert!(!Recording.can_advance_to(Rejected));
    }

    #[test]
    fn no_skipping_steps() {
        assert!(!Validating.can_advance_to(Debiting));
        assert!(!Debiting.can_advance_to(Recording));
        assert!(!Completed.can_advance_to(Validating));
    }

    #[test]
    fn committing_states() {
        assert!(!Checking.is_committing());
        assert!(Debiting.is_committing());
        assert!(Recording.is_committing());
        assert!(!Completed.is_committing());
    }
}
