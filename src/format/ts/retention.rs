use std::collections::VecDeque;

/// Ordered record of output units still considered live.
///
/// With a depth limit, registering a unit beyond the limit evicts the oldest
/// ones; without a limit (archival mode) units only accumulate.
#[derive(Debug, Clone)]
pub struct RetentionWindow<U> {
    depth: Option<usize>,
    units: VecDeque<U>,
    evicted: u64,
}

impl<U: PartialEq> RetentionWindow<U> {
    /// `depth == 0` means unbounded.
    pub fn new(depth: usize) -> Self {
        Self {
            depth: (depth > 0).then_some(depth),
            units: VecDeque::new(),
            evicted: 0,
        }
    }

    pub fn depth(&self) -> Option<usize> {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn contains(&self, unit: &U) -> bool {
        self.units.contains(unit)
    }

    pub fn iter(&self) -> impl Iterator<Item = &U> {
        self.units.iter()
    }

    /// Units evicted since creation.
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    /// Appends `unit` and returns the units that fell out of the window,
    /// oldest first. Registering a unit already present changes nothing.
    pub fn register(&mut self, unit: U) -> Vec<U> {
        if self.units.contains(&unit) {
            return Vec::new();
        }
        self.units.push_back(unit);

        let mut evicted = Vec::new();
        if let Some(depth) = self.depth {
            while self.units.len() > depth {
                if let Some(oldest) = self.units.pop_front() {
                    evicted.push(oldest);
                }
            }
        }
        self.evicted += evicted.len() as u64;
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_live_depth_keeps_last_units() {
        let mut window = RetentionWindow::new(3);
        let mut evicted = Vec::new();
        for unit in 1..=5 {
            evicted.extend(window.register(unit));
        }
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(evicted, vec![1, 2]);
        assert_eq!(window.evicted_count(), 2);
    }

    #[test]
    fn test_archival_mode_never_evicts() {
        let mut window = RetentionWindow::new(0);
        for unit in 0..100 {
            assert!(window.register(unit).is_empty());
        }
        assert_eq!(window.len(), 100);
        assert_eq!(window.depth(), None);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut window = RetentionWindow::new(2);
        window.register("a");
        window.register("b");
        assert!(window.register("b").is_empty());
        assert_eq!(window.len(), 2);
        assert!(window.contains(&"a"));
    }
}
