//! Device twin request bookkeeping
//!
//! Request ids come from one counter shared by GET and reported PATCH. At most
//! one GET is outstanding; its reply is the next 200 twin response, whatever
//! `$rid` it carries.

/// Request id counter and the GET in-flight flag
#[derive(Debug, Default)]
pub struct TwinCoordinator {
    counter: u32,
    get_in_flight: bool,
}

impl TwinCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-increment the counter; the first id handed out is 1
    pub fn next_request_id(&mut self) -> u32 {
        self.counter = self.counter.wrapping_add(1);
        self.counter
    }

    /// Last id handed out, 0 if none yet
    pub fn last_request_id(&self) -> u32 {
        self.counter
    }

    /// Mark a GET outstanding. Set before the publish is attempted.
    pub fn begin_get(&mut self) {
        self.get_in_flight = true;
    }

    /// Clear the flag after a GET publish failed
    pub fn abort_get(&mut self) {
        self.get_in_flight = false;
    }

    /// Consume the outstanding GET, if any. Returns whether one was pending.
    pub fn take_get_reply(&mut self) -> bool {
        std::mem::take(&mut self.get_in_flight)
    }

    pub fn is_get_in_flight(&self) -> bool {
        self.get_in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_start_at_one_and_increase() {
        let mut twin = TwinCoordinator::new();
        assert_eq!(twin.last_request_id(), 0);
        assert_eq!(twin.next_request_id(), 1);
        assert_eq!(twin.next_request_id(), 2);
        assert_eq!(twin.next_request_id(), 3);
        assert_eq!(twin.last_request_id(), 3);
    }

    #[test]
    fn test_get_flag_lifecycle() {
        let mut twin = TwinCoordinator::new();
        assert!(!twin.take_get_reply());

        twin.begin_get();
        assert!(twin.is_get_in_flight());
        assert!(twin.take_get_reply());
        assert!(!twin.is_get_in_flight());
        assert!(!twin.take_get_reply());

        twin.begin_get();
        twin.abort_get();
        assert!(!twin.is_get_in_flight());
    }
}
