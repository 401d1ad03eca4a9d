use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::api::{self, NewPost, Post, PostId, Registration, Subject};
use crate::config;
use crate::data::{AccountService, HttpAccountService, HttpFeedService, HttpInteractionService};
use crate::error::Error;
use crate::feed_view::{FeedEvent, FeedView};
use crate::session;
use crate::storage::{self, KeyValueStore};

pub const USAGE: &str = "blogfeed - Read, like and comment on blog posts from the terminal.

Usage: blogfeed <command> [args]

  signup USERNAME EMAIL PASSWORD CONFIRM   Create an account
  login USERNAME PASSWORD                  Sign in and remember the session
  logout                                   Forget the stored session
  whoami                                   Show who is signed in
  feed [PAGE]                              Show a page of posts with comments
  mine [PAGE]                              Show your own posts on a page
  like post|comment ID [--page N]          Like a post or comment
  comment POST_ID TEXT [--page N]          Comment on a post
  delete POST_ID [--page N]                Delete one of your posts
  post TITLE CONTENT [IMAGE]               Publish a post, optionally with an image
  likes POST_ID                            List who liked a post

  --version, -V        Show version and exit
  --help,    -h        Show this help message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Signup(Registration),
    Login { username: String, password: String },
    Logout,
    Whoami,
    Feed { page: u32 },
    Mine { page: u32 },
    Like { subject: Subject, page: u32 },
    Comment { post: PostId, text: String, page: u32 },
    Delete { post: PostId, page: u32 },
    Post(NewPost),
    Likes { post: PostId },
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Command> {
        let (page, args) = take_page_flag(args)?;
        let Some((name, rest)) = args.split_first() else {
            bail!("missing command (try --help)");
        };
        let rest: Vec<&str> = rest.iter().map(String::as_str).collect();

        let command = match (name.as_str(), rest.as_slice()) {
            ("signup", [username, email, password1, password2]) => {
                Command::Signup(Registration {
                    username: username.to_string(),
                    email: email.to_string(),
                    password1: password1.to_string(),
                    password2: password2.to_string(),
                })
            }
            ("login", [username, password]) => Command::Login {
                username: username.to_string(),
                password: password.to_string(),
            },
            ("logout", []) => Command::Logout,
            ("whoami", []) => Command::Whoami,
            ("feed", []) => Command::Feed { page },
            ("feed", [n]) => Command::Feed {
                page: parse_number(n, "page")?,
            },
            ("mine", []) => Command::Mine { page },
            ("mine", [n]) => Command::Mine {
                page: parse_number(n, "page")?,
            },
            ("like", [kind, id]) => {
                let id = parse_number(id, "id")?;
                let subject = match *kind {
                    "post" => Subject::Post(id),
                    "comment" => Subject::Comment(id),
                    other => bail!("can only like a post or a comment, not {other:?}"),
                };
                Command::Like { subject, page }
            }
            ("comment", [post, text]) => Command::Comment {
                post: parse_number(post, "post id")?,
                text: text.to_string(),
                page,
            },
            ("delete", [post]) => Command::Delete {
                post: parse_number(post, "post id")?,
                page,
            },
            ("post", [title, content]) => Command::Post(NewPost {
                title: title.to_string(),
                content: content.to_string(),
                image: None,
            }),
            ("post", [title, content, image]) => Command::Post(NewPost {
                title: title.to_string(),
                content: content.to_string(),
                image: Some(PathBuf::from(image)),
            }),
            ("likes", [post]) => Command::Likes {
                post: parse_number(post, "post id")?,
            },
            (other, _) => bail!("unknown command or wrong arguments: {other} (try --help)"),
        };
        Ok(command)
    }
}

fn take_page_flag(args: &[String]) -> Result<(u32, Vec<String>)> {
    let mut page = 1;
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--page" {
            let value = iter.next().ok_or_else(|| anyhow!("--page needs a value"))?;
            page = parse_number(value, "page")?;
        } else {
            rest.push(arg.clone());
        }
    }
    Ok((page, rest))
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{what} must be a number, got {value:?}"))
}

pub fn run(command: Command) -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let store: Arc<dyn KeyValueStore> = Arc::new(
        storage::Store::open(storage::Options {
            path: cfg.storage.path.clone(),
        })
        .context("open storage")?,
    );
    let session = Arc::new(session::Manager::restore(store).context("restore session")?);
    let client = Arc::new(
        api::Client::new(session.clone(), api::ClientConfig::from(&cfg.api))
            .context("create api client")?,
    );

    let runner = Runner {
        session,
        client,
        timeout: cfg.api.timeout + Duration::from_secs(5),
    };
    let mut out = std::io::stdout().lock();
    runner.execute(command, &mut out)
}

struct Runner {
    session: Arc<session::Manager>,
    client: Arc<api::Client>,
    timeout: Duration,
}

impl Runner {
    fn execute(&self, command: Command, out: &mut impl Write) -> Result<()> {
        match command {
            Command::Signup(registration) => {
                HttpAccountService::new(self.client.clone())
                    .register(&registration)
                    .map_err(|err| user_error(err.into()))?;
                writeln!(out, "Registration successful! You can now log in.")?;
            }
            Command::Login { username, password } => {
                let key = HttpAccountService::new(self.client.clone())
                    .login(&username, &password)
                    .map_err(|err| user_error(err.into()))?;
                self.session.login(&username, &key)?;
                writeln!(out, "Login successful! Signed in as {username}.")?;
            }
            Command::Logout => {
                self.session.logout()?;
                writeln!(out, "Signed out.")?;
            }
            Command::Whoami => match self.session.username() {
                Some(username) => writeln!(out, "{username}")?,
                None => writeln!(out, "Not signed in.")?,
            },
            Command::Feed { page } => {
                let view = self.open_view(page)?;
                render_page(out, &view, view.page().items.iter().collect())?;
            }
            Command::Mine { page } => {
                if !self.session.is_authenticated() {
                    bail!("You must be logged in to see your posts.");
                }
                let view = self.open_view(page)?;
                render_page(out, &view, view.my_posts())?;
            }
            Command::Like { subject, page } => {
                let mut view = self.open_view(page)?;
                view.like(subject).map_err(user_error)?;
                self.settle(&mut view)?;
                let count = view
                    .cache()
                    .likes_count(subject)
                    .map(|n| format!(" ({n} likes)"))
                    .unwrap_or_default();
                writeln!(out, "Liked {subject}{count}.")?;
            }
            Command::Comment { post, text, page } => {
                let mut view = self.open_view(page)?;
                view.comment(post, &text).map_err(user_error)?;
                for event in self.settle(&mut view)? {
                    if let FeedEvent::CommentAdded { comment } = event {
                        writeln!(out, "Comment #{} added to post {post}.", comment.id)?;
                    }
                }
            }
            Command::Delete { post, page } => {
                let mut view = self.open_view(page)?;
                view.delete_post(post).map_err(user_error)?;
                self.settle(&mut view)?;
                writeln!(out, "Post {post} deleted.")?;
            }
            Command::Post(new_post) => {
                let mut view = self.open_view(1)?;
                view.create_post(new_post).map_err(user_error)?;
                for event in self.settle(&mut view)? {
                    if let FeedEvent::PostCreated { post } = event {
                        writeln!(out, "Published post #{}: {}", post.id, post.title)?;
                    }
                }
            }
            Command::Likes { post } => {
                let mut view = self.new_view();
                view.request_liked_users(post);
                for event in self.settle(&mut view)? {
                    if let FeedEvent::LikedUsers { usernames, .. } = event {
                        if usernames.is_empty() {
                            writeln!(out, "No users liked this post.")?;
                        }
                        for username in usernames {
                            writeln!(out, "{username}")?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn new_view(&self) -> FeedView {
        FeedView::new(
            self.session.clone(),
            Arc::new(HttpFeedService::new(self.client.clone())),
            Arc::new(HttpInteractionService::new(self.client.clone())),
        )
    }

    /// Opens a view on `page`. The page count is unknown until the first
    /// page arrives, so later pages take a second fetch.
    fn open_view(&self, page: u32) -> Result<FeedView> {
        let mut view = self.new_view();
        view.load_page(1);
        self.settle(&mut view)?;
        if page > 1 {
            let target = view.load_page(page);
            if target != page {
                log::info!("page {page} is out of range, showing page {target}");
            }
            self.settle(&mut view)?;
        }
        Ok(view)
    }

    /// Waits for outstanding requests and turns the first failure into an error.
    fn settle(&self, view: &mut FeedView) -> Result<Vec<FeedEvent>> {
        let events = view.wait_idle(self.timeout);
        if view.is_busy() {
            bail!("timed out waiting for the server");
        }
        let failure = events.iter().find_map(|event| match event {
            FeedEvent::PageFailed { error, .. }
            | FeedEvent::CommentsFailed { error }
            | FeedEvent::LikeRolledBack { error, .. }
            | FeedEvent::CommentFailed { error, .. }
            | FeedEvent::DeleteFailed { error, .. }
            | FeedEvent::CreateFailed { error }
            | FeedEvent::LikedUsersFailed { error, .. } => Some(error.clone()),
            _ => None,
        });
        match failure {
            Some(error) => Err(user_error(error)),
            None => Ok(events),
        }
    }
}

fn user_error(err: Error) -> anyhow::Error {
    anyhow!("{} ({})", err.user_message(), err.kind())
}

fn render_page(out: &mut impl Write, view: &FeedView, posts: Vec<&Post>) -> Result<()> {
    let page = view.page();
    writeln!(out, "Page {} of {}", page.page_index, page.total_pages)?;

    for post in &posts {
        writeln!(out)?;
        writeln!(
            out,
            "#{} {} by {} ({}) likes: {}",
            post.id,
            post.title,
            post.author,
            post.created_label(),
            post.likes_count
        )?;
        for line in post.content.lines() {
            writeln!(out, "  {line}")?;
        }
        if let Some(image) = post.image.as_deref() {
            writeln!(out, "  image: {image}")?;
        }
        let comments = view.cache().comments_for(post.id);
        if comments.is_empty() {
            writeln!(out, "  No comments yet.")?;
        }
        for comment in comments {
            writeln!(
                out,
                "  #{} {}: {} (likes: {})",
                comment.id, comment.author, comment.content, comment.likes_count
            )?;
        }
    }

    if posts.is_empty() {
        writeln!(out)?;
        writeln!(out, "No posts yet")?;
    }
    Ok(())
}
