use sea_orm::{
    EntityTrait, QuerySelect, Select,
    sea_query::{LockBehavior, LockType},
};

/// Row-claiming for work queues polled by several workers at once.
pub trait ForUpdateSkipLocked {
    /// `SELECT ... FOR UPDATE SKIP LOCKED`: lock the returned rows for the rest of the
    /// transaction and silently pass over rows another worker already holds.
    fn for_update_skip_locked(self) -> Self;
}

impl<E> ForUpdateSkipLocked for Select<E>
where
    E: EntityTrait,
{
    fn for_update_skip_locked(self) -> Self {
        self.lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
    }
}
