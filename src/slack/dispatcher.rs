//! Event dispatcher: classify inbound Slack events and fan them out to
//! the session registry or the roundtable.
//!
//! Classification never blocks the Slack transport: an event that
//! triggers an injection completes with an enqueue and a reaction, and an
//! event that starts a new execution spawns a task and returns.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{GlobalConfig, InstanceConfig};
use crate::orchestrator::injection::InjectionQueue;
use crate::orchestrator::ProgressSink;
use crate::session::registry::{ExecuteOptions, SessionRegistry};
use crate::tools::media::{ImageAnalyzerTool, PdfExtractorTool};
use crate::tools::slack_tools::{SlackReactionTool, SlackSendMessageTool};

use super::approval::{ApprovalLedger, SlackApprovalSystem};
use super::display::SlackDisplaySystem;
use super::files::{ingest_shared_files, process_outbox, SharedFile};
use super::formatting::markdown_to_slack;
use super::gateway::{OutboundMessage, SlackGateway};
use super::onboarding::{self, OnboardingManager};
use super::progress::{drive_status_updates, ProgressTracker};
use super::roundtable;
use super::routing::{
    find_inline_mention, parse_instance_prefix, ChannelTopicCache, ThreadOwnerMap,
    ROUNDTABLE_OWNER,
};

const HOURGLASS: &str = "hourglass_flowing_sand";
const ENVELOPE: &str = "incoming_envelope";
const REGENERATE_REACTION: &str = "arrows_counterclockwise";
const CANCEL_REACTION: &str = "x";
const SEEN_CAPACITY: usize = 10_000;
const PROMPT_INDEX_CAPACITY: usize = 1_000;

const FAILURE_TEXT: &str = "Sorry — something went wrong on my end.";

/// A normalized inbound message event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: String,
    pub user: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub files: Vec<SharedFile>,
    pub is_dm: bool,
    pub is_bot: bool,
    /// Set when the event arrived as an `app_mention` or the text carries
    /// the bot's own mention token.
    pub is_mention: bool,
}

/// A normalized reaction event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReaction {
    pub channel: String,
    pub user: String,
    pub reaction: String,
    pub message_ts: String,
    /// Set when the reacted message was posted by this bot.
    pub item_is_own: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionKind {
    Single,
    Roundtable,
}

/// Conversation-keyed record of a running execution. Its existence
/// indicates "busy".
struct ActiveExecution {
    queue: InjectionQueue,
    cancel: CancellationToken,
    status_ts: Mutex<Option<String>>,
    kind: ExecutionKind,
    /// Mid-roundtable arrivals, replayed after completion.
    replay: Mutex<Vec<InboundMessage>>,
}

/// What a user prompt produced, kept for regenerate lookups.
#[derive(Debug, Clone)]
struct PromptRecord {
    instance: String,
    conversation_id: String,
    channel: String,
    thread_ts: String,
    user: String,
    user_ts: String,
    prompt: String,
}

/// Bounded insertion-ordered set for event dedup.
struct SeenSet {
    set: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenSet {
    fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns `true` the first time a key is seen.
    fn insert(&mut self, key: String) -> bool {
        if !self.set.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

/// Resolved routing target for one message.
struct RouteTarget {
    instance: String,
    conversation_id: String,
    prompt: String,
    kind: ExecutionKind,
    thread_ts: String,
}

/// Outcome of admission control for a classified message.
enum Admission {
    /// The conversation is busy; steer the running execution.
    Existing(Arc<ActiveExecution>),
    /// A fresh execution was registered for this conversation.
    Fresh(Arc<ActiveExecution>),
}

/// The event dispatcher.
pub struct Dispatcher {
    config: Arc<GlobalConfig>,
    registry: Arc<SessionRegistry>,
    gateway: Arc<dyn SlackGateway>,
    topics: ChannelTopicCache,
    owners: ThreadOwnerMap,
    approvals: Arc<ApprovalLedger>,
    onboarding: OnboardingManager,
    active: Mutex<HashMap<String, Arc<ActiveExecution>>>,
    seen: Mutex<SeenSet>,
    prompt_index: Mutex<HashMap<String, PromptRecord>>,
    prompt_order: Mutex<VecDeque<String>>,
    /// Conversations whose sessions already carry the connector tools.
    mounted_tools: Mutex<HashSet<String>>,
    bot_user_id: Mutex<String>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        registry: Arc<SessionRegistry>,
        gateway: Arc<dyn SlackGateway>,
    ) -> Arc<Self> {
        let topics = ChannelTopicCache::new(Arc::clone(&gateway), config.instance_names());
        let owners = ThreadOwnerMap::new(config.thread_owner_capacity);
        let onboarding = OnboardingManager::new(config.users_dir(), Arc::clone(&gateway));
        Arc::new(Self {
            config,
            registry,
            gateway,
            topics,
            owners,
            approvals: Arc::new(ApprovalLedger::new()),
            onboarding,
            active: Mutex::new(HashMap::new()),
            seen: Mutex::new(SeenSet::new(SEEN_CAPACITY)),
            prompt_index: Mutex::new(HashMap::new()),
            prompt_order: Mutex::new(VecDeque::new()),
            mounted_tools: Mutex::new(HashSet::new()),
            bot_user_id: Mutex::new(String::new()),
        })
    }

    /// Install the bot's own user id once known (used for mention parsing).
    pub fn set_bot_user_id(&self, user_id: &str) {
        *self.bot_user_id.lock() = user_id.to_owned();
    }

    /// Thread owner for a conversation (exposed for tests and admin views).
    #[must_use]
    pub fn thread_owner(&self, conversation_id: &str) -> Option<String> {
        self.owners.get(conversation_id)
    }

    /// Whether a conversation currently has a running execution.
    #[must_use]
    pub fn is_busy(&self, conversation_id: &str) -> bool {
        self.active.lock().contains_key(conversation_id)
    }

    fn strip_bot_mention(&self, text: &str) -> (String, bool) {
        let bot_id = self.bot_user_id.lock().clone();
        if bot_id.is_empty() {
            return (text.trim().to_owned(), false);
        }
        let token = format!("<@{bot_id}>");
        if text.contains(&token) {
            (text.replace(&token, " ").trim().to_owned(), true)
        } else {
            (text.trim().to_owned(), false)
        }
    }

    /// Admission control: steer the running execution, or register a
    /// fresh one. Single critical section so concurrent deliveries for
    /// one conversation cannot double-start.
    fn admit(&self, conversation_id: &str, kind: ExecutionKind) -> Admission {
        let mut active = self.active.lock();
        if let Some(existing) = active.get(conversation_id) {
            return Admission::Existing(Arc::clone(existing));
        }
        let execution = Arc::new(ActiveExecution {
            queue: InjectionQueue::new(),
            cancel: CancellationToken::new(),
            status_ts: Mutex::new(None),
            kind,
            replay: Mutex::new(Vec::new()),
        });
        active.insert(conversation_id.to_owned(), Arc::clone(&execution));
        Admission::Fresh(execution)
    }

    fn finish_execution(&self, conversation_id: &str) -> Option<Arc<ActiveExecution>> {
        self.active.lock().remove(conversation_id)
    }

    /// Entry point for message-shaped events.
    pub async fn handle_message(self: &Arc<Self>, message: InboundMessage) {
        if message.is_bot {
            return;
        }
        if message.text.trim().is_empty() && message.files.is_empty() {
            return;
        }
        // Dedup duplicate Slack deliveries of the same event.
        if !self
            .seen
            .lock()
            .insert(format!("msg:{}:{}", message.channel, message.ts))
        {
            debug!(ts = %message.ts, "duplicate message delivery ignored");
            return;
        }

        self.dispatch_message(message).await;
    }

    /// Classification and fan-out for an already-deduplicated message.
    ///
    /// Returns a boxed future rather than being declared `async fn`: this
    /// function spawns a task that recurses back into itself (roundtable
    /// replay), and an `impl Future` return type can't express that
    /// self-reference without the compiler needing an opaque type whose
    /// hidden type mentions itself.
    fn dispatch_message(
        self: &Arc<Self>,
        message: InboundMessage,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(self.dispatch_message_inner(message))
    }

    async fn dispatch_message_inner(self: &Arc<Self>, message: InboundMessage) {
        let (text, had_mention_token) = self.strip_bot_mention(&message.text);
        let is_mention = message.is_mention || had_mention_token;

        let Some(target) = self.route(&message, &text, is_mention).await else {
            return;
        };

        // File shares download into the resolved instance's working
        // directory and prepend a user-visible preamble. Roundtables have
        // no single working directory; their files stay in Slack.
        let prompt = if message.files.is_empty() || target.kind == ExecutionKind::Roundtable {
            target.prompt.clone()
        } else {
            let Some(instance) = self.config.instance(&target.instance) else {
                return;
            };
            let preamble = ingest_shared_files(
                &self.gateway,
                &message.files,
                &instance.working_dir,
                self.config.file_size_cap_bytes,
            )
            .await;
            if target.prompt.is_empty() {
                preamble
            } else {
                format!("{preamble}\n\n{}", target.prompt)
            }
        };

        match self.admit(&target.conversation_id, target.kind) {
            Admission::Existing(execution) => {
                if execution.kind == ExecutionKind::Roundtable {
                    execution.replay.lock().push(message.clone());
                    info!(
                        conversation_id = %target.conversation_id,
                        "message queued for post-roundtable replay"
                    );
                    return;
                }
                execution.queue.inject(prompt);
                if let Err(err) = self
                    .gateway
                    .add_reaction(&message.channel, &message.ts, ENVELOPE)
                    .await
                {
                    debug!(%err, "envelope reaction failed");
                }
                info!(
                    conversation_id = %target.conversation_id,
                    "message injected into running execution"
                );
            }
            Admission::Fresh(execution) => match target.kind {
                ExecutionKind::Single => {
                    let this = Arc::clone(self);
                    let user = message.user.clone();
                    let user_ts = message.ts.clone();
                    let channel = message.channel.clone();
                    tokio::spawn(async move {
                        this.run_single(
                            &target.instance,
                            &target.conversation_id,
                            &channel,
                            &target.thread_ts,
                            &user,
                            &user_ts,
                            &prompt,
                            execution,
                        )
                        .await;
                    });
                }
                ExecutionKind::Roundtable => {
                    let this = Arc::clone(self);
                    let channel = message.channel.clone();
                    let user_ts = message.ts.clone();
                    tokio::spawn(async move {
                        this.run_roundtable(
                            &target.conversation_id,
                            &channel,
                            &target.thread_ts,
                            &user_ts,
                            &prompt,
                            execution,
                        )
                        .await;
                    });
                }
            },
        }
    }

    /// The classification table. First match wins; `None` means ignore.
    async fn route(
        &self,
        message: &InboundMessage,
        text: &str,
        is_mention: bool,
    ) -> Option<RouteTarget> {
        let known = self.config.instance_names();
        let default = self.config.defaults.instance.to_lowercase();
        let thread_ts = message
            .thread_ts
            .clone()
            .unwrap_or_else(|| message.ts.clone());

        if message.is_dm {
            let conversation_id = format!("dm:{}", message.user);
            let (instance, remaining, _) = parse_instance_prefix(text, &known, &default);
            return Some(RouteTarget {
                instance,
                conversation_id,
                prompt: remaining,
                kind: ExecutionKind::Single,
                thread_ts,
            });
        }

        let conversation_id = format!("{}:{thread_ts}", message.channel);
        let topic = self.topics.get(&message.channel).await;

        let (prefix_instance, remaining, was_explicit) =
            parse_instance_prefix(text, &known, &default);
        let inline = if was_explicit {
            None
        } else {
            find_inline_mention(text, &known)
        };
        let explicit = was_explicit || inline.is_some();
        let explicit_instance = if was_explicit {
            prefix_instance
        } else {
            inline.unwrap_or_else(|| default.clone())
        };
        let explicit_prompt = if was_explicit {
            remaining
        } else {
            text.to_owned()
        };

        // Roundtable: unaddressed message in a [mode:roundtable] channel.
        if topic.mode.as_deref() == Some("roundtable") && !explicit {
            return Some(RouteTarget {
                instance: String::new(),
                conversation_id,
                prompt: text.to_owned(),
                kind: ExecutionKind::Roundtable,
                thread_ts,
            });
        }

        // Directed (forced): [instance:<name>] topic wins over prefixes.
        if let Some(forced) = topic.instance {
            return Some(RouteTarget {
                instance: forced,
                conversation_id,
                prompt: text.to_owned(),
                kind: ExecutionKind::Single,
                thread_ts,
            });
        }

        // Directed (explicit): `<name>:` prefix or `@<name>` in the text.
        if explicit {
            // Roundtable ownership is sticky: explicit addressing inside a
            // roundtable thread routes this one message without a transfer.
            if self.owners.get(&conversation_id).as_deref() != Some(ROUNDTABLE_OWNER) {
                self.owners.set(&conversation_id, &explicit_instance);
            }
            return Some(RouteTarget {
                instance: explicit_instance,
                conversation_id,
                prompt: explicit_prompt,
                kind: ExecutionKind::Single,
                thread_ts,
            });
        }

        // Follow-up: the thread already has an owner.
        if let Some(owner) = self.owners.get(&conversation_id) {
            if owner == ROUNDTABLE_OWNER {
                return Some(RouteTarget {
                    instance: String::new(),
                    conversation_id,
                    prompt: text.to_owned(),
                    kind: ExecutionKind::Roundtable,
                    thread_ts,
                });
            }
            return Some(RouteTarget {
                instance: owner,
                conversation_id,
                prompt: text.to_owned(),
                kind: ExecutionKind::Single,
                thread_ts,
            });
        }

        // Channel default.
        if let Some(channel_default) = topic.default {
            return Some(RouteTarget {
                instance: channel_default,
                conversation_id,
                prompt: text.to_owned(),
                kind: ExecutionKind::Single,
                thread_ts,
            });
        }

        // Mention of the bot falls back to the global default.
        if is_mention {
            return Some(RouteTarget {
                instance: default,
                conversation_id,
                prompt: text.to_owned(),
                kind: ExecutionKind::Single,
                thread_ts,
            });
        }

        None
    }

    /// Entry point for reaction events.
    pub async fn handle_reaction(self: &Arc<Self>, reaction: InboundReaction) {
        let name = reaction.reaction.to_lowercase();

        // Summon: a reaction named after a hosted instance.
        if self.config.instance(&name).is_some() {
            self.handle_summon(&name, &reaction).await;
            return;
        }

        if name == REGENERATE_REACTION {
            self.handle_regenerate(&reaction).await;
            return;
        }

        if name == CANCEL_REACTION {
            self.handle_cancel(&reaction);
        }
    }

    async fn handle_summon(self: &Arc<Self>, instance_name: &str, reaction: &InboundReaction) {
        let dedup_key = format!("summon:{instance_name}:{}", reaction.message_ts);
        if !self.seen.lock().insert(dedup_key) {
            debug!(instance_name, ts = %reaction.message_ts, "duplicate summon ignored");
            return;
        }

        let fetched = match self
            .gateway
            .fetch_message(&reaction.channel, &reaction.message_ts)
            .await
        {
            Ok(Some(fetched)) => fetched,
            Ok(None) => {
                warn!(ts = %reaction.message_ts, "summoned message not found");
                return;
            }
            Err(err) => {
                warn!(%err, "summoned message fetch failed");
                return;
            }
        };
        if fetched.is_bot || fetched.text.trim().is_empty() {
            return;
        }

        let channel_name = self.topics.get(&reaction.channel).await.name;
        let prompt = format!(
            "[<@{}> summoned you by reacting with :{instance_name}: to this message in #{channel_name}]\n{}",
            reaction.user, fetched.text
        );
        let conversation_id = format!("summon:{instance_name}:{}", reaction.message_ts);

        let Admission::Fresh(execution) = self.admit(&conversation_id, ExecutionKind::Single)
        else {
            debug!(%conversation_id, "summon conversation already executing");
            return;
        };

        let this = Arc::clone(self);
        let instance = instance_name.to_owned();
        let channel = reaction.channel.clone();
        let thread_ts = reaction.message_ts.clone();
        let user = reaction.user.clone();
        tokio::spawn(async move {
            this.run_single(
                &instance,
                &conversation_id,
                &channel,
                &thread_ts,
                &user,
                &thread_ts,
                &prompt,
                execution,
            )
            .await;
        });
    }

    async fn handle_regenerate(self: &Arc<Self>, reaction: &InboundReaction) {
        let record = self.prompt_index.lock().get(&reaction.message_ts).cloned();
        let Some(record) = record else {
            debug!(ts = %reaction.message_ts, "regenerate reaction on unknown message");
            return;
        };

        let Admission::Fresh(execution) =
            self.admit(&record.conversation_id, ExecutionKind::Single)
        else {
            debug!(
                conversation_id = %record.conversation_id,
                "regenerate skipped; conversation busy"
            );
            return;
        };

        info!(
            instance = %record.instance,
            conversation_id = %record.conversation_id,
            "regenerating response"
        );
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_single(
                &record.instance,
                &record.conversation_id,
                &record.channel,
                &record.thread_ts,
                &record.user,
                &record.user_ts,
                &record.prompt,
                execution,
            )
            .await;
        });
    }

    fn handle_cancel(&self, reaction: &InboundReaction) {
        let active = self.active.lock();
        for execution in active.values() {
            let matches = execution
                .status_ts
                .lock()
                .as_deref()
                .is_some_and(|ts| ts == reaction.message_ts);
            if matches {
                info!(ts = %reaction.message_ts, "cancellation requested via reaction");
                execution.cancel.cancel();
                return;
            }
        }
        debug!(ts = %reaction.message_ts, "cancel reaction did not match a status message");
    }

    /// Entry point for block actions (approval button clicks).
    pub fn handle_block_action(&self, action_id: &str, value: &str) {
        if let Some(correlation_id) = ApprovalLedger::correlation_from_action_id(action_id) {
            if !self.approvals.resolve(correlation_id, value) {
                debug!(correlation_id, "click for unknown or resolved approval");
            }
        } else {
            debug!(action_id, "unhandled block action");
        }
    }

    /// Mount the connector-provided Slack tools and the media tools on a
    /// session once, post-creation.
    async fn mount_connector_tools(
        &self,
        instance: &str,
        conversation_id: &str,
        channel: &str,
        thread_ts: &str,
        user_ts: &str,
    ) {
        {
            let mut mounted = self.mounted_tools.lock();
            if !mounted.insert(format!("{instance}:{conversation_id}")) {
                return;
            }
        }
        let Ok(session) = self.registry.get_or_create(instance, conversation_id).await else {
            return;
        };
        session.hooks.mount_tool(Arc::new(SlackSendMessageTool::new(
            Arc::clone(&self.gateway),
            channel.to_owned(),
            Some(thread_ts.to_owned()),
        )));
        session.hooks.mount_tool(Arc::new(SlackReactionTool::new(
            Arc::clone(&self.gateway),
            channel.to_owned(),
            user_ts.to_owned(),
        )));
        session.hooks.mount_tool(Arc::new(ImageAnalyzerTool::new()));
        session.hooks.mount_tool(Arc::new(PdfExtractorTool::new()));
    }

    /// Run one single-instance execution end to end: reactions, status
    /// message, execute, persona response, outbox, onboarding.
    #[allow(clippy::too_many_arguments)]
    async fn run_single(
        self: &Arc<Self>,
        instance_name: &str,
        conversation_id: &str,
        channel: &str,
        thread_ts: &str,
        user: &str,
        user_ts: &str,
        prompt: &str,
        execution: Arc<ActiveExecution>,
    ) {
        let Some(instance) = self.config.instance(instance_name).cloned() else {
            // Another process may host this instance; stay silent.
            debug!(instance_name, "instance not hosted here; dropping");
            self.finish_execution(conversation_id);
            return;
        };

        let mut onboarding_state = self.onboarding.load(user).await;
        self.onboarding.welcome_if_new(&mut onboarding_state).await;
        let is_new_thread = onboarding::record_thread(&mut onboarding_state, conversation_id);
        let cross_thread_ref = onboarding::has_cross_thread_reference(prompt);

        if let Err(err) = self.gateway.add_reaction(channel, user_ts, HOURGLASS).await {
            debug!(%err, "hourglass add failed");
        }

        // Editable status message under the bot's own identity.
        let status_ts = match self
            .gateway
            .post_message(OutboundMessage::bot(
                channel,
                Some(thread_ts.to_owned()),
                "⚙️ Thinking…",
            ))
            .await
        {
            Ok(ts) => Some(ts),
            Err(err) => {
                warn!(%err, "status message post failed");
                None
            }
        };
        *execution.status_ts.lock() = status_ts.clone();

        self.mount_connector_tools(&instance.name, conversation_id, channel, thread_ts, user_ts)
            .await;

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let consumer = status_ts.as_ref().map(|ts| {
            let tracker = ProgressTracker::new(
                instance.name.clone(),
                execution.queue.clone(),
                Duration::from_secs(self.config.status_throttle_seconds),
            );
            tokio::spawn(drive_status_updates(
                progress_rx,
                tracker,
                Arc::clone(&self.gateway),
                channel.to_owned(),
                ts.clone(),
            ))
        });

        let opts = ExecuteOptions {
            progress: ProgressSink::new(progress_tx),
            display: Some(Arc::new(SlackDisplaySystem::new(
                Arc::clone(&self.gateway),
                channel.to_owned(),
                Some(thread_ts.to_owned()),
            ))),
            approval: Some(Arc::new(SlackApprovalSystem::new(
                Arc::clone(&self.gateway),
                Arc::clone(&self.approvals),
                channel.to_owned(),
                Some(thread_ts.to_owned()),
            ))),
            cancel: execution.cancel.clone(),
            queue: execution.queue.clone(),
        };

        let started = Instant::now();
        let result = self
            .registry
            .execute(&instance.name, conversation_id, prompt, opts)
            .await;
        let duration_secs = started.elapsed().as_secs();

        if let Some(handle) = consumer {
            let _ = handle.await;
        }
        if let Some(ref ts) = status_ts {
            if let Err(err) = self.gateway.delete_message(channel, ts).await {
                debug!(%err, "status message delete failed");
            }
        }

        match result {
            Ok(text) if !text.trim().is_empty() => {
                let suffix = onboarding::response_suffix(
                    &mut onboarding_state,
                    is_new_thread,
                    duration_secs,
                    cross_thread_ref,
                );
                let body = format!("{}{suffix}", markdown_to_slack(&text));
                match self
                    .gateway
                    .post_message(OutboundMessage::persona(
                        channel,
                        Some(thread_ts.to_owned()),
                        body,
                        instance.persona.name.clone(),
                        instance.persona.emoji.clone(),
                    ))
                    .await
                {
                    Ok(response_ts) => {
                        self.remember_prompt(
                            response_ts,
                            &instance,
                            conversation_id,
                            channel,
                            thread_ts,
                            user,
                            user_ts,
                            prompt,
                        );
                    }
                    Err(err) => warn!(%err, "final response post failed"),
                }
            }
            Ok(_) => {
                info!(conversation_id, "execution produced no text (cancelled or empty)");
            }
            Err(err) => {
                warn!(conversation_id, %err, "execution failed");
                let message = OutboundMessage::persona(
                    channel,
                    Some(thread_ts.to_owned()),
                    FAILURE_TEXT,
                    instance.persona.name.clone(),
                    instance.persona.emoji.clone(),
                );
                if let Err(post_err) = self.gateway.post_message(message).await {
                    warn!(%post_err, "failure notice post failed");
                }
            }
        }

        if let Err(err) = self.gateway.remove_reaction(channel, user_ts, HOURGLASS).await {
            debug!(%err, "hourglass remove failed");
        }
        self.finish_execution(conversation_id);

        // First response in a thread claims ownership if nothing has.
        if self.owners.get(conversation_id).is_none() {
            self.owners
                .set(conversation_id, &instance.name.to_lowercase());
        }

        match process_outbox(
            &self.gateway,
            &instance.working_dir,
            channel,
            Some(thread_ts),
        )
        .await
        {
            Ok(0) => {}
            Ok(count) => info!(count, "outbox files uploaded"),
            Err(err) => warn!(%err, "outbox processing failed"),
        }

        self.onboarding.save(&onboarding_state).await;
    }

    /// Run a roundtable fan-out for one unaddressed message.
    async fn run_roundtable(
        self: &Arc<Self>,
        conversation_id: &str,
        channel: &str,
        thread_ts: &str,
        user_ts: &str,
        prompt: &str,
        execution: Arc<ActiveExecution>,
    ) {
        let participants: Vec<InstanceConfig> = self
            .config
            .instances
            .iter()
            .filter(|i| i.enabled)
            .cloned()
            .collect();
        if participants.is_empty() {
            self.finish_execution(conversation_id);
            return;
        }

        if let Err(err) = self.gateway.add_reaction(channel, user_ts, HOURGLASS).await {
            debug!(%err, "hourglass add failed");
        }
        let status_ts = match self
            .gateway
            .post_message(OutboundMessage::bot(
                channel,
                Some(thread_ts.to_owned()),
                "⚙️ Roundtable — waiting for perspectives…",
            ))
            .await
        {
            Ok(ts) => Some(ts),
            Err(err) => {
                warn!(%err, "roundtable status post failed");
                None
            }
        };
        *execution.status_ts.lock() = status_ts.clone();

        let responses =
            roundtable::collect_responses(&self.registry, &participants, conversation_id, prompt)
                .await;
        info!(
            conversation_id,
            survivors = responses.len(),
            "roundtable collected"
        );
        roundtable::post_responses(&self.gateway, &participants, &responses, channel, thread_ts)
            .await;

        // Roundtable ownership is sticky for the thread.
        self.owners.set(conversation_id, ROUNDTABLE_OWNER);

        if let Some(ref ts) = status_ts {
            if let Err(err) = self.gateway.delete_message(channel, ts).await {
                debug!(%err, "roundtable status delete failed");
            }
        }
        if let Err(err) = self.gateway.remove_reaction(channel, user_ts, HOURGLASS).await {
            debug!(%err, "hourglass remove failed");
        }
        self.finish_execution(conversation_id);

        // Replay messages that arrived mid-roundtable through the normal
        // classification path (they already passed dedup on first arrival).
        let queued: Vec<InboundMessage> = execution.replay.lock().drain(..).collect();
        for message in queued {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.dispatch_message(message).await;
            });
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn remember_prompt(
        &self,
        response_ts: String,
        instance: &InstanceConfig,
        conversation_id: &str,
        channel: &str,
        thread_ts: &str,
        user: &str,
        user_ts: &str,
        prompt: &str,
    ) {
        let record = PromptRecord {
            instance: instance.name.clone(),
            conversation_id: conversation_id.to_owned(),
            channel: channel.to_owned(),
            thread_ts: thread_ts.to_owned(),
            user: user.to_owned(),
            user_ts: user_ts.to_owned(),
            prompt: prompt.to_owned(),
        };
        let mut index = self.prompt_index.lock();
        let mut order = self.prompt_order.lock();
        index.insert(response_ts.clone(), record);
        order.push_back(response_ts);
        while order.len() > PROMPT_INDEX_CAPACITY {
            if let Some(old) = order.pop_front() {
                index.remove(&old);
            }
        }
    }
}
