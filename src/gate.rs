//! Synchronous authorization checks run before any mutating action.
//!
//! Nothing here touches the network or mutates state; a denial is reported
//! to the caller as-is and the action stops.

use std::fmt;

use crate::api::{PostId, Subject};
use crate::error::ErrorKind;
use crate::feed::LikeRecord;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    CreatePost,
    Like,
    Comment,
    DeletePost,
}

impl ActionKind {
    fn phrase(&self) -> &'static str {
        match self {
            ActionKind::CreatePost => "create a post",
            ActionKind::Like => "like posts and comments",
            ActionKind::Comment => "comment",
            ActionKind::DeletePost => "delete posts",
        }
    }
}

/// An action awaiting a decision, with whatever it needs to be judged.
#[derive(Debug, Clone, Copy)]
pub enum Action<'a> {
    CreatePost { title: &'a str, content: &'a str },
    Like { subject: Subject, liked: &'a LikeRecord },
    Comment { text: &'a str },
    DeletePost { author: &'a str },
}

impl Action<'_> {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::CreatePost { .. } => ActionKind::CreatePost,
            Action::Like { .. } => ActionKind::Like,
            Action::Comment { .. } => ActionKind::Comment,
            Action::DeletePost { .. } => ActionKind::DeletePost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    Unauthenticated(ActionKind),
    AlreadyLiked(Subject),
    EmptyComment,
    MissingField(&'static str),
    NotAuthor,
    NotLoaded(PostId),
    InProgress(ActionKind),
}

impl DenyReason {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DenyReason::Unauthenticated(_) => ErrorKind::Unauthenticated,
            DenyReason::AlreadyLiked(_) => ErrorKind::AlreadyLiked,
            DenyReason::EmptyComment | DenyReason::MissingField(_) => ErrorKind::Validation,
            DenyReason::NotAuthor => ErrorKind::NotAuthor,
            DenyReason::NotLoaded(_) => ErrorKind::NotFound,
            DenyReason::InProgress(_) => ErrorKind::InProgress,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Unauthenticated(action) => {
                write!(f, "You must be logged in to {}.", action.phrase())
            }
            DenyReason::AlreadyLiked(Subject::Post(_)) => {
                f.write_str("You have already liked this post!")
            }
            DenyReason::AlreadyLiked(Subject::Comment(_)) => {
                f.write_str("You have already liked this comment!")
            }
            DenyReason::EmptyComment => f.write_str("A comment cannot be empty."),
            DenyReason::MissingField(field) => write!(f, "A post needs a {field}."),
            DenyReason::NotAuthor => f.write_str("You can only delete your own posts."),
            DenyReason::NotLoaded(id) => write!(f, "Post {id} is not on this page."),
            DenyReason::InProgress(ActionKind::DeletePost) => {
                f.write_str("This post is already being deleted.")
            }
            DenyReason::InProgress(action) => {
                write!(f, "Still waiting to {} on this item.", action.phrase())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

pub fn check(session: &Session, action: &Action<'_>) -> Decision {
    match action {
        Action::CreatePost { title, content } => {
            if !session.is_authenticated {
                deny_unauthenticated(action)
            } else if title.trim().is_empty() {
                Decision::Deny(DenyReason::MissingField("title"))
            } else if content.trim().is_empty() {
                Decision::Deny(DenyReason::MissingField("content"))
            } else {
                Decision::Allow
            }
        }
        Action::Like { subject, liked } => {
            if !session.is_authenticated {
                deny_unauthenticated(action)
            } else if liked.contains(subject) {
                Decision::Deny(DenyReason::AlreadyLiked(*subject))
            } else {
                Decision::Allow
            }
        }
        Action::Comment { text } => {
            if !session.is_authenticated {
                deny_unauthenticated(action)
            } else if text.trim().is_empty() {
                Decision::Deny(DenyReason::EmptyComment)
            } else {
                Decision::Allow
            }
        }
        // A known username that differs from the author is NotAuthor even
        // when the session is otherwise incomplete.
        Action::DeletePost { author } => match session.username.as_deref() {
            None => deny_unauthenticated(action),
            Some(username) if username != *author => Decision::Deny(DenyReason::NotAuthor),
            Some(_) if !session.is_authenticated => deny_unauthenticated(action),
            Some(_) => Decision::Allow,
        },
    }
}

fn deny_unauthenticated(action: &Action<'_>) -> Decision {
    Decision::Deny(DenyReason::Unauthenticated(action.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carol() -> Session {
        Session::signed_in("carol", "tok")
    }

    #[test]
    fn anonymous_sessions_are_turned_away() {
        let liked = LikeRecord::default();
        let anon = Session::anonymous();
        let actions = [
            Action::CreatePost {
                title: "t",
                content: "c",
            },
            Action::Like {
                subject: Subject::Post(42),
                liked: &liked,
            },
            Action::Comment { text: "hi" },
            Action::DeletePost { author: "carol" },
        ];
        for action in actions {
            assert_eq!(
                check(&anon, &action),
                Decision::Deny(DenyReason::Unauthenticated(action.kind()))
            );
        }
    }

    #[test]
    fn second_like_is_denied() {
        let mut liked = LikeRecord::default();
        let action = Action::Like {
            subject: Subject::Post(7),
            liked: &liked,
        };
        assert!(check(&carol(), &action).is_allowed());

        liked.insert(Subject::Post(7));
        let again = Action::Like {
            subject: Subject::Post(7),
            liked: &liked,
        };
        assert_eq!(
            check(&carol(), &again),
            Decision::Deny(DenyReason::AlreadyLiked(Subject::Post(7)))
        );
        let other = Action::Like {
            subject: Subject::Comment(7),
            liked: &liked,
        };
        assert!(check(&carol(), &other).is_allowed());
    }

    #[test]
    fn blank_comment_is_a_validation_error() {
        let decision = check(&carol(), &Action::Comment { text: "  \n " });
        assert_eq!(decision, Decision::Deny(DenyReason::EmptyComment));
        assert_eq!(DenyReason::EmptyComment.kind(), ErrorKind::Validation);
    }

    #[test]
    fn post_requires_title_and_content() {
        assert_eq!(
            check(
                &carol(),
                &Action::CreatePost {
                    title: " ",
                    content: "body"
                }
            ),
            Decision::Deny(DenyReason::MissingField("title"))
        );
    }

    #[test]
    fn non_author_cannot_delete_whatever_the_session_state() {
        let signed_in = Session::signed_in("alice", "tok");
        let half = Session {
            is_authenticated: false,
            username: Some("alice".into()),
            credential: None,
        };
        for session in [signed_in, half] {
            assert_eq!(
                check(&session, &Action::DeletePost { author: "bob" }),
                Decision::Deny(DenyReason::NotAuthor)
            );
        }
        assert!(check(
            &Session::signed_in("bob", "tok"),
            &Action::DeletePost { author: "bob" }
        )
        .is_allowed());
    }

    #[test]
    fn reasons_read_differently() {
        let messages = [
            DenyReason::Unauthenticated(ActionKind::Like).to_string(),
            DenyReason::AlreadyLiked(Subject::Post(1)).to_string(),
            DenyReason::EmptyComment.to_string(),
            DenyReason::NotAuthor.to_string(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
