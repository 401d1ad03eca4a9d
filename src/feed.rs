use std::collections::{HashMap, HashSet};

use crate::api::{Comment, CommentId, Post, PostId, PostPage, Subject};
use crate::gate::DenyReason;
use crate::pagination::{self, PAGE_SIZE};

/// Subjects liked during this session. There is no unlike, so entries are
/// only dropped when a like fails or the view goes away.
#[derive(Debug, Clone, Default)]
pub struct LikeRecord {
    subjects: HashSet<Subject>,
}

impl LikeRecord {
    pub fn contains(&self, subject: &Subject) -> bool {
        self.subjects.contains(subject)
    }

    pub fn insert(&mut self, subject: Subject) -> bool {
        self.subjects.insert(subject)
    }

    pub fn remove(&mut self, subject: &Subject) -> bool {
        self.subjects.remove(subject)
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    pub page_index: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub items: Vec<Post>,
}

impl Default for FeedPage {
    fn default() -> Self {
        Self {
            page_index: 1,
            page_size: PAGE_SIZE,
            total_pages: 1,
            items: Vec::new(),
        }
    }
}

/// Undo information for a like applied ahead of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingLike {
    pub subject: Subject,
    previous: Option<i64>,
}

#[derive(Debug, Default)]
pub struct FeedCache {
    page: FeedPage,
    server_count: u64,
    comments: HashMap<PostId, Vec<Comment>>,
    liked: LikeRecord,
}

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self) -> &FeedPage {
        &self.page
    }

    pub fn server_count(&self) -> u64 {
        self.server_count
    }

    pub fn liked(&self) -> &LikeRecord {
        &self.liked
    }

    pub fn post(&self, id: PostId) -> Option<&Post> {
        self.page.items.iter().find(|post| post.id == id)
    }

    pub fn comment(&self, id: CommentId) -> Option<&Comment> {
        self.comments
            .values()
            .flat_map(|list| list.iter())
            .find(|comment| comment.id == id)
    }

    pub fn comments_for(&self, post: PostId) -> &[Comment] {
        self.comments.get(&post).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Posts on the current page written by `author`.
    pub fn posts_by<'a: 'b, 'b>(
        &'a self,
        author: &'b str,
    ) -> impl Iterator<Item = &'a Post> + 'b {
        self.page.items.iter().filter(move |post| post.author == author)
    }

    pub fn likes_count(&self, subject: Subject) -> Option<i64> {
        match subject {
            Subject::Post(id) => self.post(id).map(|post| post.likes_count),
            Subject::Comment(id) => self.comment(id).map(|comment| comment.likes_count),
        }
    }

    /// Swaps in a freshly fetched page. `total_pages` is always recomputed
    /// from the server count.
    pub fn replace_page(&mut self, page_index: u32, fetched: PostPage) -> &FeedPage {
        let total_pages = pagination::total_pages(fetched.count, PAGE_SIZE);
        self.server_count = fetched.count;
        self.page = FeedPage {
            page_index: page_index.clamp(1, total_pages),
            page_size: PAGE_SIZE,
            total_pages,
            items: fetched.results,
        };
        &self.page
    }

    pub fn replace_comments(&mut self, comments: Vec<Comment>) {
        self.comments.clear();
        for comment in comments {
            self.comments.entry(comment.post).or_default().push(comment);
        }
    }

    pub fn apply_optimistic_like(&mut self, subject: Subject) -> Result<PendingLike, DenyReason> {
        if !self.liked.insert(subject) {
            return Err(DenyReason::AlreadyLiked(subject));
        }
        let previous = self.likes_count(subject);
        if let Some(count) = self.likes_count_mut(subject) {
            *count += 1;
        }
        log::debug!("feed: optimistic like on {subject}");
        Ok(PendingLike { subject, previous })
    }

    /// Undoes an optimistic like. The count is only restored when it still
    /// carries our increment; a reload in between already brought server truth.
    pub fn rollback_like(&mut self, pending: PendingLike) {
        self.liked.remove(&pending.subject);
        if let Some(previous) = pending.previous {
            if let Some(count) = self.likes_count_mut(pending.subject) {
                if *count == previous + 1 {
                    *count = previous;
                }
            }
        }
        log::debug!("feed: rolled back like on {}", pending.subject);
    }

    /// Puts a local like back on top of a page snapshot that predates it.
    /// A pending like's undo point moves with it.
    pub fn reapply_like(&mut self, subject: Subject, pending: Option<&mut PendingLike>) {
        if !self.liked.contains(&subject) {
            return;
        }
        let Some(count) = self.likes_count_mut(subject) else {
            return;
        };
        *count += 1;
        let previous = *count - 1;
        if let Some(pending) = pending {
            pending.previous = Some(previous);
        }
        log::debug!("feed: reapplied like on {subject} over an older snapshot");
    }

    /// Stores the server's copy of a new comment. A comment already known by
    /// id is replaced, never duplicated.
    pub fn append_comment(&mut self, comment: Comment) {
        for list in self.comments.values_mut() {
            list.retain(|existing| existing.id != comment.id);
        }
        self.comments.entry(comment.post).or_default().push(comment);
    }

    pub fn remove_post(&mut self, id: PostId) -> Option<Post> {
        let index = self.page.items.iter().position(|post| post.id == id)?;
        let removed = self.page.items.remove(index);
        self.comments.remove(&id);
        self.server_count = self.server_count.saturating_sub(1);
        self.page.total_pages = pagination::total_pages(self.server_count, PAGE_SIZE);
        Some(removed)
    }

    fn likes_count_mut(&mut self, subject: Subject) -> Option<&mut i64> {
        match subject {
            Subject::Post(id) => self
                .page
                .items
                .iter_mut()
                .find(|post| post.id == id)
                .map(|post| &mut post.likes_count),
            Subject::Comment(id) => self
                .comments
                .values_mut()
                .flat_map(|list| list.iter_mut())
                .find(|comment| comment.id == id)
                .map(|comment| &mut comment.likes_count),
        }
    }
}
