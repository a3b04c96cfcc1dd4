use tokio::time::Instant;
use uuid::Uuid;

use super::item::NodeKey;

/// A queued request to re-render one node.
#[derive(Debug, Clone)]
pub struct InvalidationRequest {
    pub id: Uuid,
    pub key: NodeKey,
    pub created_at: Instant,
    pub last_executed_at: Option<Instant>,
    /// Failed attempts so far. Only the retry path increments it.
    pub execution_counter: u32,
    /// Nodes whose invalidation led to this one, oldest first.
    pub(crate) trail: Vec<String>,
}

impl InvalidationRequest {
    pub fn new(key: NodeKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            created_at: Instant::now(),
            last_executed_at: None,
            execution_counter: 0,
            trail: Vec::new(),
        }
    }

    /// Request for a node that depends on this one.
    ///
    /// The dependent inherits the trail plus this node, so a dependency cycle
    /// stops as soon as it would revisit a node already on the path.
    pub(crate) fn cascade(&self, dependent: &str) -> Option<Self> {
        if dependent == self.key.id || self.trail.iter().any(|id| id == dependent) {
            return None;
        }
        let mut trail = self.trail.clone();
        trail.push(self.key.id.clone());

        Some(Self {
            trail,
            ..Self::new(self.key.sibling(dependent))
        })
    }

    /// Stamp a failed attempt before handing the request to the retry lane.
    pub(crate) fn mark_failed(&mut self, now: Instant) {
        self.last_executed_at = Some(now);
        self.execution_counter = self.execution_counter.saturating_add(1);
    }

    pub fn depth(&self) -> usize {
        self.trail.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> InvalidationRequest {
        InvalidationRequest::new(NodeKey::new(id, "de", "live"))
    }

    #[test]
    fn new_requests_start_fresh() {
        let request = request("a");
        assert_eq!(request.execution_counter, 0);
        assert!(request.last_executed_at.is_none());
        assert_eq!(request.depth(), 0);
    }

    #[test]
    fn cascade_keeps_partition_and_extends_trail() {
        let child = request("x").cascade("a").expect("dependent");
        assert_eq!(child.key, NodeKey::new("a", "de", "live"));
        assert_eq!(child.trail, vec!["x".to_string()]);
        assert_eq!(child.execution_counter, 0);
    }

    #[test]
    fn cascade_stops_at_cycles() {
        let root = request("a");
        assert!(root.cascade("a").is_none());

        let b = root.cascade("b").expect("b depends on a");
        let c = b.cascade("c").expect("c depends on b");
        assert!(c.cascade("a").is_none());
        assert!(c.cascade("b").is_none());
        assert!(c.cascade("d").is_some());
    }

    #[test]
    fn mark_failed_counts_attempts() {
        let mut request = request("a");
        let now = Instant::now();
        request.mark_failed(now);
        request.mark_failed(now);
        assert_eq!(request.execution_counter, 2);
        assert_eq!(request.last_executed_at, Some(now));
    }
}
