use std::sync::Arc;

use crate::api::{
    self, ApiError, Comment, LikedUser, NewPost, Post, PostId, PostPage, Registration, Subject,
};

pub trait FeedService: Send + Sync {
    fn load_page(&self, page: u32, page_size: u32) -> Result<PostPage, ApiError>;
    fn load_comments(&self) -> Result<Vec<Comment>, ApiError>;
    fn liked_users(&self, post: PostId) -> Result<Vec<LikedUser>, ApiError>;
}

pub trait InteractionService: Send + Sync {
    fn create_post(&self, post: &NewPost) -> Result<Post, ApiError>;
    fn delete_post(&self, post: PostId) -> Result<(), ApiError>;
    fn like(&self, subject: Subject) -> Result<(), ApiError>;
    fn comment(&self, post: PostId, content: &str) -> Result<Comment, ApiError>;
}

pub trait AccountService: Send + Sync {
    fn login(&self, username: &str, password: &str) -> Result<String, ApiError>;
    fn register(&self, registration: &Registration) -> Result<(), ApiError>;
}

pub struct HttpFeedService {
    client: Arc<api::Client>,
}

impl HttpFeedService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for HttpFeedService {
    fn load_page(&self, page: u32, page_size: u32) -> Result<PostPage, ApiError> {
        self.client.list_posts(page, page_size)
    }

    fn load_comments(&self) -> Result<Vec<Comment>, ApiError> {
        self.client.list_comments()
    }

    fn liked_users(&self, post: PostId) -> Result<Vec<LikedUser>, ApiError> {
        self.client.liked_users(post)
    }
}

pub struct HttpInteractionService {
    client: Arc<api::Client>,
}

impl HttpInteractionService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl InteractionService for HttpInteractionService {
    fn create_post(&self, post: &NewPost) -> Result<Post, ApiError> {
        self.client.create_post(post)
    }

    fn delete_post(&self, post: PostId) -> Result<(), ApiError> {
        self.client.delete_post(post)
    }

    fn like(&self, subject: Subject) -> Result<(), ApiError> {
        self.client.like(subject)
    }

    fn comment(&self, post: PostId, content: &str) -> Result<Comment, ApiError> {
        self.client.create_comment(post, content)
    }
}

pub struct HttpAccountService {
    client: Arc<api::Client>,
}

impl HttpAccountService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl AccountService for HttpAccountService {
    fn login(&self, username: &str, password: &str) -> Result<String, ApiError> {
        self.client.login(username, password)
    }

    fn register(&self, registration: &Registration) -> Result<(), ApiError> {
        self.client.register(registration)
    }
}
