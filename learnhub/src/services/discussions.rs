//! Real-time discussion feed
//!
//! A course's discussions are followed through one live query. Each
//! discussion in the result set gets its own nested live query over its
//! replies, attached when the discussion is added and torn down when it is
//! removed. The feed keeps an incremental cache keyed by discussion id, so
//! a reply only ever touches its own thread.

use crate::access::{self, Screen};
use crate::config;
use crate::database::{
    from_document, ChangeKind, Discussion, DocumentStore, LiveQuery, NewPost, QuerySnapshot,
    Reply, Repository,
};
use crate::error::{AppError, Result};
use crate::session::SessionContext;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// A discussion with its replies, oldest reply first
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub discussion: Discussion,
    pub replies: Vec<Reply>,
}

/// Human-friendly age of a post: `Today`, `Yesterday`, `N days ago` within
/// a week, otherwise the calendar date
pub fn relative_date(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let days = (now - at).num_days();
    match days {
        d if d <= 0 => "Today".to_string(),
        1 => "Yesterday".to_string(),
        d if d < 7 => format!("{} days ago", d),
        _ => at.format("%Y-%m-%d").to_string(),
    }
}

fn require_message(message: &str) -> Result<String> {
    let message = message.trim();
    if message.is_empty() {
        return Err(AppError::Validation("Message cannot be empty".to_string()));
    }
    Ok(message.to_string())
}

/// Aborts the wrapped task when dropped
struct Listener(JoinHandle<()>);

impl Drop for Listener {
    fn drop(&mut self) {
        self.0.abort();
    }
}

type ReplyUpdate = (String, QuerySnapshot);

fn parse_replies(discussion_id: &str, snapshot: &QuerySnapshot) -> Vec<Reply> {
    snapshot
        .documents
        .iter()
        .filter_map(|doc| match from_document::<Reply>(doc) {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::warn!("Skipping reply on discussion {}: {}", discussion_id, e);
                None
            }
        })
        .collect()
}

/// Incremental cache owned by the feed task
struct FeedState {
    store: DocumentStore,
    threads: HashMap<String, Thread>,
    reply_listeners: HashMap<String, Listener>,
    /// Discussion ids in live-query order
    order: Vec<String>,
    reply_updates: mpsc::UnboundedSender<ReplyUpdate>,
}

impl FeedState {
    /// Attach the nested reply listener for a discussion and return its
    /// current replies
    async fn attach_replies(&mut self, discussion_id: &str) -> Vec<Reply> {
        let mut live: LiveQuery = match self
            .store
            .listen(Repository::replies_query(discussion_id))
            .await
        {
            Ok(live) => live,
            Err(e) => {
                tracing::error!("Failed to follow replies of {}: {}", discussion_id, e);
                return Vec::new();
            }
        };

        let replies = match live.next().await {
            Some(snapshot) => parse_replies(discussion_id, &snapshot),
            None => Vec::new(),
        };

        let id = discussion_id.to_string();
        let updates = self.reply_updates.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(snapshot) = live.next().await {
                if updates.send((id.clone(), snapshot)).is_err() {
                    break;
                }
            }
        });

        self.reply_listeners
            .insert(discussion_id.to_string(), Listener(forwarder));
        tracing::debug!("Attached reply listener for discussion {}", discussion_id);

        replies
    }

    fn detach_replies(&mut self, discussion_id: &str) {
        if self.reply_listeners.remove(discussion_id).is_some() {
            tracing::debug!("Detached reply listener for discussion {}", discussion_id);
        }
    }

    async fn apply_discussions(&mut self, snapshot: QuerySnapshot) {
        for change in snapshot.changes {
            let id = change.document.id.clone();
            match change.kind {
                ChangeKind::Added => {
                    let discussion = match from_document::<Discussion>(&change.document) {
                        Ok(discussion) => discussion,
                        Err(e) => {
                            tracing::warn!("Skipping discussion {}: {}", id, e);
                            continue;
                        }
                    };
                    let replies = self.attach_replies(&id).await;
                    self.threads.insert(id, Thread { discussion, replies });
                }
                ChangeKind::Modified => match from_document::<Discussion>(&change.document) {
                    Ok(discussion) => match self.threads.get_mut(&id) {
                        Some(thread) => thread.discussion = discussion,
                        None => {
                            let replies = self.attach_replies(&id).await;
                            self.threads.insert(id, Thread { discussion, replies });
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Dropping discussion {} after malformed update: {}", id, e);
                        self.threads.remove(&id);
                        self.detach_replies(&id);
                    }
                },
                ChangeKind::Removed => {
                    self.threads.remove(&id);
                    self.detach_replies(&id);
                }
            }
        }

        self.order = snapshot.documents.into_iter().map(|doc| doc.id).collect();
    }

    fn apply_replies(&mut self, discussion_id: &str, snapshot: QuerySnapshot) {
        // Updates can still arrive from a listener detached a moment ago
        if let Some(thread) = self.threads.get_mut(discussion_id) {
            thread.replies = parse_replies(discussion_id, &snapshot);
        }
    }

    fn ordered_threads(&self) -> Vec<Thread> {
        self.order
            .iter()
            .filter_map(|id| self.threads.get(id))
            .cloned()
            .collect()
    }
}

/// Live view of a course's discussions.
///
/// Dropping the feed (or calling [`DiscussionFeed::close`]) tears down
/// every listener it holds.
pub struct DiscussionFeed {
    course_id: String,
    threads: watch::Receiver<Vec<Thread>>,
    task: JoinHandle<()>,
}

impl DiscussionFeed {
    /// Follow a course's discussions. Returns once the current threads
    /// and their replies are loaded.
    pub async fn subscribe(store: &DocumentStore, course_id: &str) -> Result<Self> {
        let mut discussions = store
            .listen(Repository::course_discussions_query(course_id))
            .await?;

        let (reply_updates, mut reply_rx) = mpsc::unbounded_channel();
        let mut state = FeedState {
            store: store.clone(),
            threads: HashMap::new(),
            reply_listeners: HashMap::new(),
            order: Vec::new(),
            reply_updates,
        };

        if let Some(initial) = discussions.next().await {
            state.apply_discussions(initial).await;
        }

        let (publisher, threads) = watch::channel(state.ordered_threads());
        tracing::info!(
            "Discussion feed for course {} started with {} threads",
            course_id,
            state.threads.len()
        );

        let feed_course = course_id.to_string();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = publisher.closed() => break,
                    snapshot = discussions.next() => match snapshot {
                        Some(snapshot) => state.apply_discussions(snapshot).await,
                        None => break,
                    },
                    Some((id, snapshot)) = reply_rx.recv() => state.apply_replies(&id, snapshot),
                }

                publisher.send_replace(state.ordered_threads());
            }

            tracing::debug!("Discussion feed for course {} stopped", feed_course);
        });

        Ok(Self {
            course_id: course_id.to_string(),
            threads,
            task,
        })
    }

    pub fn course_id(&self) -> &str {
        &self.course_id
    }

    /// Current threads, newest discussion first
    pub fn threads(&self) -> Vec<Thread> {
        self.threads.borrow().clone()
    }

    /// Wait for the next published update
    pub async fn changed(&mut self) -> Result<Vec<Thread>> {
        self.threads
            .changed()
            .await
            .map_err(|_| AppError::Generic("Discussion feed closed".to_string()))?;
        Ok(self.threads.borrow_and_update().clone())
    }

    /// Wait until the threads satisfy a condition
    pub async fn wait_for<F>(&mut self, mut condition: F) -> Result<Vec<Thread>>
    where
        F: FnMut(&[Thread]) -> bool,
    {
        let threads = self
            .threads
            .wait_for(|threads| condition(threads))
            .await
            .map_err(|_| AppError::Generic("Discussion feed closed".to_string()))?;
        Ok(threads.clone())
    }

    pub fn close(self) {
        tracing::debug!("Closing discussion feed for course {}", self.course_id);
    }
}

impl Drop for DiscussionFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Service for the course discussions tab
#[derive(Clone)]
pub struct DiscussionsService {
    repo: Repository,
    session: SessionContext,
}

impl DiscussionsService {
    pub fn new(repo: Repository, session: SessionContext) -> Self {
        Self { repo, session }
    }

    pub async fn subscribe(&self, course_id: &str) -> Result<DiscussionFeed> {
        let profile = self.session.require_profile()?;
        access::authorize(&profile, Screen::CourseDetail)?;

        DiscussionFeed::subscribe(self.repo.store(), course_id).await
    }

    /// Start a discussion as the signed-in user
    pub async fn post_discussion(&self, course_id: &str, message: &str) -> Result<Discussion> {
        let profile = self.session.require_profile()?;
        let message = require_message(message)?;

        tracing::info!("Posting discussion in course {}", course_id);

        self.repo
            .create_discussion(
                course_id,
                NewPost {
                    author: profile.author(),
                    message,
                },
            )
            .await
            .map_err(|e| {
                tracing::error!("Failed to post discussion: {}", e);
                e
            })
    }

    pub async fn post_reply(&self, discussion_id: &str, message: &str) -> Result<Reply> {
        let profile = self.session.require_profile()?;
        let message = require_message(message)?;

        if self.repo.get_discussion(discussion_id).await?.is_none() {
            return Err(AppError::not_found(config::DISCUSSIONS, discussion_id));
        }

        tracing::info!("Posting reply on discussion {}", discussion_id);

        self.repo
            .create_reply(
                discussion_id,
                NewPost {
                    author: profile.author(),
                    message,
                },
            )
            .await
            .map_err(|e| {
                tracing::error!("Failed to post reply: {}", e);
                e
            })
    }

    pub async fn like_discussion(&self, discussion_id: &str) -> Result<Discussion> {
        self.session.require_profile()?;
        self.repo.like_discussion(discussion_id).await
    }

    pub async fn like_reply(&self, discussion_id: &str, reply_id: &str) -> Result<Reply> {
        self.session.require_profile()?;
        self.repo.like_reply(discussion_id, reply_id).await
    }
}
