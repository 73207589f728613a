//! Pre-configured meetings.

use chrono::Utc;
use common::types::{MeetingId, UserId};
use session_coordinator::models::Meeting;

/// Builder for [`Meeting`] records.
///
/// Defaults: public, active, created by `"host-user"`, `max_participants`
/// of 0 (the default capacity).
pub struct TestMeeting {
    id: String,
    title: String,
    created_by: String,
    is_private: bool,
    is_active: bool,
    max_participants: u32,
}

impl TestMeeting {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: format!("Test meeting {id}"),
            created_by: "host-user".to_string(),
            is_private: false,
            is_active: true,
            max_participants: 0,
        }
    }

    pub fn titled(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn created_by(mut self, user_id: &str) -> Self {
        self.created_by = user_id.to_string();
        self
    }

    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn with_capacity(mut self, max_participants: u32) -> Self {
        self.max_participants = max_participants;
        self
    }

    pub fn build(self) -> Meeting {
        Meeting {
            id: MeetingId::parse(self.id).expect("test meeting id should be valid"),
            title: self.title,
            description: String::new(),
            created_by: UserId::parse(self.created_by).expect("test user id should be valid"),
            scheduled_for: None,
            created_at: Utc::now(),
            is_private: self.is_private,
            is_active: self.is_active,
            max_participants: self.max_participants,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let meeting = TestMeeting::new("m1").build();
        assert_eq!(meeting.id.as_str(), "m1");
        assert!(!meeting.is_private);
        assert!(meeting.is_active);
        assert_eq!(meeting.effective_capacity(), 50);
    }

    #[test]
    fn test_private_meeting_admits_creator_only() {
        let meeting = TestMeeting::new("m1").created_by("alice").private().build();
        assert!(meeting.admits(&UserId::parse("alice").unwrap()));
        assert!(!meeting.admits(&UserId::parse("bob").unwrap()));
    }
}
