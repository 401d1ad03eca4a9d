//! A mounted feed: one page of posts, their comments, and every action the
//! user takes on them.
//!
//! Network calls run on worker threads. Their results come back over a
//! channel and are applied on the owning thread by [`FeedView::poll`] or
//! [`FeedView::wait`], which report what changed as [`FeedEvent`]s.
//! Dropping the view abandons whatever is still in flight.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::api::{ApiError, ApiErrorKind, Comment, LikedUser, NewPost, Post, PostId, PostPage, Subject};
use crate::data::{FeedService, InteractionService};
use crate::error::Error;
use crate::feed::{FeedCache, FeedPage, PendingLike};
use crate::gate::{self, Action, DenyReason};
use crate::interaction::{InFlight, Key};
use crate::pagination::{Paginator, PAGE_SIZE};
use crate::session;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    PageLoaded { page_index: u32, total_pages: u32 },
    PageFailed { page_index: u32, error: Error },
    /// A page response arrived after a newer request replaced it.
    StalePageDiscarded { page_index: u32 },
    CommentsLoaded { count: usize },
    CommentsFailed { error: Error },
    LikeCommitted { subject: Subject, likes_count: Option<i64> },
    LikeRolledBack { subject: Subject, error: Error },
    CommentAdded { comment: Comment },
    CommentFailed { post: PostId, error: Error },
    PostDeleted { post: PostId },
    DeleteFailed { post: PostId, error: Error },
    PostCreated { post: Post },
    CreateFailed { error: Error },
    LikedUsers { post: PostId, usernames: Vec<String> },
    LikedUsersFailed { post: PostId, error: Error },
}

enum AsyncResponse {
    Page {
        request_id: u64,
        page_index: u32,
        result: Result<PostPage, ApiError>,
    },
    Comments {
        request_id: u64,
        result: Result<Vec<Comment>, ApiError>,
    },
    Like {
        subject: Subject,
        result: Result<(), ApiError>,
    },
    Comment {
        post: PostId,
        result: Result<Comment, ApiError>,
    },
    Delete {
        post: PostId,
        result: Result<(), ApiError>,
    },
    CreatePost {
        result: Result<Post, ApiError>,
    },
    LikedUsers {
        post: PostId,
        result: Result<Vec<LikedUser>, ApiError>,
    },
}

/// A change made here that list snapshots requested earlier do not carry.
#[derive(Debug, Clone)]
enum LocalChange {
    Like(Subject),
    Comment(Comment),
}

#[derive(Debug, Clone, Copy)]
struct PendingPage {
    request_id: u64,
    page_index: u32,
}

pub struct FeedView {
    session: Arc<session::Manager>,
    feed_service: Arc<dyn FeedService>,
    interaction_service: Arc<dyn InteractionService>,
    cache: FeedCache,
    pager: Paginator,
    in_flight: InFlight,
    pending_likes: HashMap<Subject, PendingLike>,
    pending_page: Option<PendingPage>,
    pending_comments: Option<u64>,
    pending_lookups: usize,
    next_request_id: u64,
    local_changes: Vec<(u64, LocalChange)>,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    abandoned: Arc<AtomicBool>,
}

impl FeedView {
    pub fn new(
        session: Arc<session::Manager>,
        feed_service: Arc<dyn FeedService>,
        interaction_service: Arc<dyn InteractionService>,
    ) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            session,
            feed_service,
            interaction_service,
            cache: FeedCache::new(),
            pager: Paginator::new(),
            in_flight: InFlight::new(),
            pending_likes: HashMap::new(),
            pending_page: None,
            pending_comments: None,
            pending_lookups: 0,
            next_request_id: 1,
            local_changes: Vec::new(),
            response_tx,
            response_rx,
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn page(&self) -> &FeedPage {
        self.cache.page()
    }

    pub fn pager(&self) -> &Paginator {
        &self.pager
    }

    pub fn cache(&self) -> &FeedCache {
        &self.cache
    }

    pub fn session(&self) -> session::Session {
        self.session.session()
    }

    /// Posts on the current page written by the signed-in user.
    pub fn my_posts(&self) -> Vec<&Post> {
        match self.session.username() {
            Some(username) => self.cache.posts_by(&username).collect(),
            None => Vec::new(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.pending_page.is_some()
            || self.pending_comments.is_some()
            || self.pending_lookups > 0
            || !self.in_flight.is_empty()
    }

    /// Requests `page` (clamped to the known range). Returns the page index
    /// actually requested.
    pub fn load_page(&mut self, page: u32) -> u32 {
        let target = self.pager.go_to(page);
        self.request_page(target);
        target
    }

    pub fn reload(&mut self) {
        self.request_page(self.pager.page_index());
    }

    /// Moves to the next page. A no-op on the last page.
    pub fn next(&mut self) -> bool {
        match self.pager.next() {
            Some(page) => {
                self.request_page(page);
                true
            }
            None => false,
        }
    }

    pub fn previous(&mut self) -> bool {
        match self.pager.previous() {
            Some(page) => {
                self.request_page(page);
                true
            }
            None => false,
        }
    }

    pub fn like(&mut self, subject: Subject) -> Result<(), Error> {
        let session = self.session.session();
        let key = Key::Like(subject);
        let liked = self.cache.liked();
        self.in_flight.admit(key, || {
            gate::check(&session, &Action::Like { subject, liked })
        })?;

        let pending = match self.cache.apply_optimistic_like(subject) {
            Ok(pending) => pending,
            Err(reason) => {
                self.finish_action(key, Ok(()));
                return Err(reason.into());
            }
        };
        self.pending_likes.insert(subject, pending);
        self.record_change(LocalChange::Like(subject));

        let service = self.interaction_service.clone();
        self.spawn(move || AsyncResponse::Like {
            subject,
            result: service.like(subject),
        });
        Ok(())
    }

    pub fn comment(&mut self, post: PostId, text: &str) -> Result<(), Error> {
        let session = self.session.session();
        self.in_flight.admit(Key::Comment(post), || {
            gate::check(&session, &Action::Comment { text })
        })?;

        let service = self.interaction_service.clone();
        let content = text.to_string();
        self.spawn(move || AsyncResponse::Comment {
            post,
            result: service.comment(post, &content),
        });
        Ok(())
    }

    /// Deletes one of the user's own posts. The post leaves the cache only
    /// once the server confirms.
    pub fn delete_post(&mut self, post: PostId) -> Result<(), Error> {
        let author = self
            .cache
            .post(post)
            .map(|found| found.author.clone())
            .ok_or(DenyReason::NotLoaded(post))?;
        let session = self.session.session();
        self.in_flight.admit(Key::Delete(post), || {
            gate::check(&session, &Action::DeletePost { author: &author })
        })?;

        let service = self.interaction_service.clone();
        self.spawn(move || AsyncResponse::Delete {
            post,
            result: service.delete_post(post),
        });
        Ok(())
    }

    pub fn create_post(&mut self, new_post: NewPost) -> Result<(), Error> {
        let session = self.session.session();
        self.in_flight.admit(Key::CreatePost, || {
            gate::check(
                &session,
                &Action::CreatePost {
                    title: &new_post.title,
                    content: &new_post.content,
                },
            )
        })?;

        let service = self.interaction_service.clone();
        self.spawn(move || AsyncResponse::CreatePost {
            result: service.create_post(&new_post),
        });
        Ok(())
    }

    pub fn request_liked_users(&mut self, post: PostId) {
        self.pending_lookups += 1;
        let service = self.feed_service.clone();
        self.spawn(move || AsyncResponse::LikedUsers {
            post,
            result: service.liked_users(post),
        });
    }

    /// Applies every response that has already arrived.
    pub fn poll(&mut self) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_response(message, &mut events);
        }
        events
    }

    /// Blocks up to `timeout` for the next response, then drains the rest.
    pub fn wait(&mut self, timeout: Duration) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        if let Ok(message) = self.response_rx.recv_timeout(timeout) {
            self.handle_response(message, &mut events);
            events.extend(self.poll());
        }
        events
    }

    /// Keeps applying responses until nothing is outstanding or `timeout`
    /// passes.
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<FeedEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.poll();
        while self.is_busy() {
            let now = Instant::now();
            if now >= deadline {
                log::warn!("feed: gave up waiting with requests outstanding");
                break;
            }
            events.extend(self.wait(deadline - now));
        }
        events
    }

    fn request_page(&mut self, page_index: u32) {
        let request_id = self.take_request_id();
        self.pending_page = Some(PendingPage {
            request_id,
            page_index,
        });
        log::debug!("feed: request {request_id} for page {page_index}");

        let service = self.feed_service.clone();
        self.spawn(move || AsyncResponse::Page {
            request_id,
            page_index,
            result: service.load_page(page_index, PAGE_SIZE),
        });

        let comments_id = self.take_request_id();
        self.pending_comments = Some(comments_id);
        let service = self.feed_service.clone();
        self.spawn(move || AsyncResponse::Comments {
            request_id: comments_id,
            result: service.load_comments(),
        });
    }

    fn take_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() -> AsyncResponse + Send + 'static,
    {
        let tx = self.response_tx.clone();
        let abandoned = self.abandoned.clone();
        thread::spawn(move || {
            let response = job();
            if abandoned.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(response);
        });
    }

    fn record_change(&mut self, change: LocalChange) {
        let seq = self.take_request_id();
        self.local_changes.push((seq, change));
    }

    /// Comments committed after list request `request_id` went out.
    fn comments_since(&self, request_id: u64) -> Vec<Comment> {
        self.local_changes
            .iter()
            .filter(|(seq, _)| *seq > request_id)
            .filter_map(|(_, change)| match change {
                LocalChange::Comment(comment) => Some(comment.clone()),
                LocalChange::Like(_) => None,
            })
            .collect()
    }

    /// Likes a page snapshot for `request_id` may be missing: those made
    /// after it was requested and those the server has not confirmed yet.
    fn reapply_likes(&mut self, request_id: u64) {
        let mut subjects: HashSet<Subject> = self.pending_likes.keys().copied().collect();
        for (seq, change) in &self.local_changes {
            if let LocalChange::Like(subject) = change {
                if *seq > request_id {
                    subjects.insert(*subject);
                }
            }
        }
        for subject in subjects {
            self.cache
                .reapply_like(subject, self.pending_likes.get_mut(&subject));
        }
    }

    fn finish_action(&mut self, key: Key, result: Result<(), ApiError>) {
        if let Some(done) = self.in_flight.complete(&key, result) {
            if done.phase().is_terminal() {
                log::debug!("feed: {key:?} ended as {:?}", done.phase());
            } else {
                log::warn!("feed: {key:?} left unsettled in {:?}", done.phase());
            }
        }
    }

    fn handle_response(&mut self, message: AsyncResponse, events: &mut Vec<FeedEvent>) {
        self.dispatch_response(message, events);
        if self.pending_page.is_none() && self.pending_comments.is_none() {
            self.local_changes.clear();
        }
    }

    fn dispatch_response(&mut self, message: AsyncResponse, events: &mut Vec<FeedEvent>) {
        match message {
            AsyncResponse::Page {
                request_id,
                page_index,
                result,
            } => self.apply_page(request_id, page_index, result, events),
            AsyncResponse::Comments { request_id, result } => {
                if self.pending_comments != Some(request_id) {
                    return;
                }
                self.pending_comments = None;
                match result {
                    Ok(comments) => {
                        let count = comments.len();
                        self.cache.replace_comments(comments);
                        for comment in self.comments_since(request_id) {
                            self.cache.append_comment(comment);
                        }
                        events.push(FeedEvent::CommentsLoaded { count });
                    }
                    Err(err) => events.push(FeedEvent::CommentsFailed { error: err.into() }),
                }
            }
            AsyncResponse::Like { subject, result } => {
                let pending = self.pending_likes.remove(&subject);
                self.finish_action(Key::Like(subject), result.clone());
                match result {
                    Ok(()) => events.push(FeedEvent::LikeCommitted {
                        subject,
                        likes_count: self.cache.likes_count(subject),
                    }),
                    Err(err) => {
                        if let Some(pending) = pending {
                            self.cache.rollback_like(pending);
                        }
                        self.local_changes.retain(|(_, change)| {
                            !matches!(change, LocalChange::Like(liked) if *liked == subject)
                        });
                        events.push(FeedEvent::LikeRolledBack {
                            subject,
                            error: err.into(),
                        });
                    }
                }
            }
            AsyncResponse::Comment { post, result } => {
                self.finish_action(
                    Key::Comment(post),
                    result.as_ref().map(|_| ()).map_err(Clone::clone),
                );
                match result {
                    Ok(comment) => {
                        self.cache.append_comment(comment.clone());
                        self.record_change(LocalChange::Comment(comment.clone()));
                        events.push(FeedEvent::CommentAdded { comment });
                    }
                    Err(err) => events.push(FeedEvent::CommentFailed {
                        post,
                        error: err.into(),
                    }),
                }
            }
            AsyncResponse::Delete { post, result } => {
                self.finish_action(Key::Delete(post), result.clone());
                match result {
                    Ok(()) => {
                        self.cache.remove_post(post);
                        events.push(FeedEvent::PostDeleted { post });
                        if self.pager.set_count(self.cache.server_count()) {
                            self.reload();
                        }
                    }
                    Err(err) => events.push(FeedEvent::DeleteFailed {
                        post,
                        error: err.into(),
                    }),
                }
            }
            AsyncResponse::CreatePost { result } => {
                self.finish_action(
                    Key::CreatePost,
                    result.as_ref().map(|_| ()).map_err(Clone::clone),
                );
                match result {
                    Ok(post) => {
                        events.push(FeedEvent::PostCreated { post });
                        self.reload();
                    }
                    Err(err) => events.push(FeedEvent::CreateFailed { error: err.into() }),
                }
            }
            AsyncResponse::LikedUsers { post, result } => {
                self.pending_lookups = self.pending_lookups.saturating_sub(1);
                match result {
                    Ok(users) => events.push(FeedEvent::LikedUsers {
                        post,
                        usernames: users.into_iter().map(|user| user.username).collect(),
                    }),
                    Err(err) => events.push(FeedEvent::LikedUsersFailed {
                        post,
                        error: err.into(),
                    }),
                }
            }
        }
    }

    fn apply_page(
        &mut self,
        request_id: u64,
        page_index: u32,
        result: Result<PostPage, ApiError>,
        events: &mut Vec<FeedEvent>,
    ) {
        let current = self.pending_page.filter(|pending| {
            pending.request_id == request_id && pending.page_index == page_index
        });
        if current.is_none() || page_index != self.pager.page_index() {
            log::debug!("feed: discarding stale response {request_id} for page {page_index}");
            events.push(FeedEvent::StalePageDiscarded { page_index });
            return;
        }
        self.pending_page = None;

        match result {
            Ok(fetched) => {
                if self.pager.set_count(fetched.count) {
                    log::debug!(
                        "feed: page {page_index} is past the end, moving to {}",
                        self.pager.page_index()
                    );
                    self.reload();
                    return;
                }
                let page = self.cache.replace_page(page_index, fetched);
                let loaded = FeedEvent::PageLoaded {
                    page_index: page.page_index,
                    total_pages: page.total_pages,
                };
                self.reapply_likes(request_id);
                events.push(loaded);
            }
            Err(err) if err.kind == ApiErrorKind::NotFound && page_index > 1 => {
                log::debug!("feed: page {page_index} no longer exists, returning to page 1");
                self.pager.go_to(1);
                self.reload();
            }
            Err(err) => {
                // The controller moved ahead of the screen; put it back.
                let displayed = self.cache.page().page_index;
                self.pager.go_to(displayed);
                events.push(FeedEvent::PageFailed {
                    page_index,
                    error: err.into(),
                });
            }
        }
    }
}

impl Drop for FeedView {
    fn drop(&mut self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }
}
