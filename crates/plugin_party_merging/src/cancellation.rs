//! Composable cancellation.
//!
//! A merge operation can be cancelled from several directions at once: the
//! original caller's token, a later duplicate registration, an explicit
//! stop, or pre-emption when a game finder takes over the party.
//! [`LinkedCancellation`] owns one root token and forwards any number of
//! linked sources into it, so adding a source never discards callbacks
//! registered earlier.

use tokio_util::sync::CancellationToken;

/// One root [`CancellationToken`] fed by any number of linked sources.
///
/// Dropping the link cancels the root, which both unblocks waiters and winds
/// down the forwarder tasks.
#[derive(Debug)]
pub struct LinkedCancellation {
    root: CancellationToken,
}

impl LinkedCancellation {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
        }
    }

    /// Links a source: when it fires, the root fires. The forwarder exits on
    /// its own once either side is cancelled.
    pub fn link(&self, source: CancellationToken) {
        let root = self.root.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = source.cancelled() => root.cancel(),
                _ = root.cancelled() => {}
            }
        });
    }

    /// A token observers can wait on.
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    pub fn cancel(&self) {
        self.root.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for LinkedCancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LinkedCancellation {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn linked_source_cancels_the_root() {
        let link = LinkedCancellation::new();
        let source = CancellationToken::new();
        link.link(source.clone());

        assert!(!link.is_cancelled());
        source.cancel();
        tokio::time::timeout(Duration::from_secs(1), link.token().cancelled())
            .await
            .expect("root should observe the linked cancellation");
    }

    #[tokio::test]
    async fn later_links_do_not_discard_earlier_ones() {
        let link = LinkedCancellation::new();
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        link.link(first.clone());
        link.link(second);

        // The first source still works after a second was added.
        first.cancel();
        tokio::time::timeout(Duration::from_secs(1), link.token().cancelled())
            .await
            .expect("first source should still cancel the root");
    }

    #[tokio::test]
    async fn drop_cancels_pending_waiters() {
        let link = LinkedCancellation::new();
        let token = link.token();
        drop(link);
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("drop should cancel the root");
    }
}
