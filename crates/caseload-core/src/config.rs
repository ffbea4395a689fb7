//! Mutation pipeline policies.
//!
//! Success-notification timing and failure rollback are configured per
//! mutation kind instead of being hard-coded at each call site. The
//! defaults encode the product behavior: a create is only reported as
//! saved once the remote store has accepted it, and only a failed create
//! unwinds its optimistic change.

/// When the user-visible success notification fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessNotice {
    /// Notify after the remote store confirms the mutation.
    Deferred,
    /// Notify as soon as the optimistic change is applied.
    Immediate,
}

/// What happens to the optimistic state when the remote call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Undo the optimistic change.
    Revert,
    /// Keep the optimistic state; the next snapshot corrects the view.
    Keep,
}

/// Policy for one mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationPolicy {
    /// Success-notification timing.
    pub notice: SuccessNotice,
    /// Failure handling for the optimistic state.
    pub failure: FailurePolicy,
}

impl MutationPolicy {
    /// Construct a policy from its two knobs.
    #[must_use]
    pub const fn new(notice: SuccessNotice, failure: FailurePolicy) -> Self {
        Self { notice, failure }
    }
}

/// Per-kind policies for the mutation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policies {
    /// Policy applied to record creation.
    pub create: MutationPolicy,
    /// Policy applied to record updates.
    pub update: MutationPolicy,
    /// Policy applied to record deletion.
    pub delete: MutationPolicy,
}

impl Policies {
    /// Apply the same policy to every mutation kind.
    #[must_use]
    pub const fn uniform(policy: MutationPolicy) -> Self {
        Self {
            create: policy,
            update: policy,
            delete: policy,
        }
    }

    /// Override the create policy.
    #[must_use]
    pub const fn with_create(mut self, policy: MutationPolicy) -> Self {
        self.create = policy;
        self
    }

    /// Override the update policy.
    #[must_use]
    pub const fn with_update(mut self, policy: MutationPolicy) -> Self {
        self.update = policy;
        self
    }

    /// Override the delete policy.
    #[must_use]
    pub const fn with_delete(mut self, policy: MutationPolicy) -> Self {
        self.delete = policy;
        self
    }
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            create: MutationPolicy::new(SuccessNotice::Deferred, FailurePolicy::Revert),
            update: MutationPolicy::new(SuccessNotice::Immediate, FailurePolicy::Keep),
            delete: MutationPolicy::new(SuccessNotice::Immediate, FailurePolicy::Keep),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_defer_create_and_only_revert_create() {
        let policies = Policies::default();
        assert_eq!(policies.create.notice, SuccessNotice::Deferred);
        assert_eq!(policies.create.failure, FailurePolicy::Revert);
        assert_eq!(policies.update.notice, SuccessNotice::Immediate);
        assert_eq!(policies.update.failure, FailurePolicy::Keep);
        assert_eq!(policies.delete.failure, FailurePolicy::Keep);
    }

    #[test]
    fn uniform_and_overrides_compose() {
        let keep_quiet = MutationPolicy::new(SuccessNotice::Immediate, FailurePolicy::Keep);
        let revert_all = Policies::uniform(MutationPolicy::new(
            SuccessNotice::Deferred,
            FailurePolicy::Revert,
        ))
        .with_delete(keep_quiet);

        assert_eq!(revert_all.create.failure, FailurePolicy::Revert);
        assert_eq!(revert_all.update.failure, FailurePolicy::Revert);
        assert_eq!(revert_all.delete, keep_quiet);
    }
}
