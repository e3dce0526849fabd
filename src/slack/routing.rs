//! Message routing: channel topic directives, instance prefix parsing,
//! and the thread-ownership map.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::gateway::SlackGateway;

/// Sentinel owner value marking a thread as roundtable-owned.
pub const ROUNDTABLE_OWNER: &str = "_ROUNDTABLE";

/// Parsed routing config from a channel's topic.
///
/// Channel topics can contain `[key:value]` directives that coexist with
/// prose text:
///
/// - `[instance:alpha]` — all messages routed to alpha
/// - `[mode:roundtable]` — unaddressed messages fan out to all instances
/// - `[default:alpha]` — alpha unless an explicit prefix overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelConfig {
    pub instance: Option<String>,
    pub mode: Option<String>,
    pub default: Option<String>,
    /// Channel name, for summon preambles.
    pub name: String,
}

/// Parse `[key:value]` routing directives from a channel topic.
///
/// Unknown instance names in directives are ignored.
#[must_use]
pub fn parse_channel_topic(topic: &str, known_instances: &[String]) -> ChannelConfig {
    static DIRECTIVE: OnceLock<Regex> = OnceLock::new();
    let directive =
        DIRECTIVE.get_or_init(|| Regex::new(r"\[(\w+):(\w+)\]").expect("static regex"));

    let mut config = ChannelConfig::default();
    for caps in directive.captures_iter(topic) {
        let key = caps[1].to_lowercase();
        let value = caps[2].to_lowercase();
        match key.as_str() {
            "instance" if known_instances.contains(&value) => config.instance = Some(value),
            "mode" if matches!(value.as_str(), "roundtable" | "open") => {
                config.mode = Some(value);
            }
            "default" if known_instances.contains(&value) => config.default = Some(value),
            _ => {}
        }
    }
    config
}

/// Result of instance-prefix parsing: the target, the remaining text, and
/// whether the user typed a name (vs. the default applying).
pub type PrefixParse = (String, String, bool);

/// Parse a leading instance address from message text.
///
/// Recognizes `name: rest`, `@name rest`, and `hey name, rest` /
/// `hi name, rest` (all case-insensitive). Otherwise the default applies
/// and the text passes through untouched.
#[must_use]
pub fn parse_instance_prefix(text: &str, known_names: &[String], default: &str) -> PrefixParse {
    let trimmed = text.trim();

    // name: rest
    if let Some((head, rest)) = trimmed.split_once(':') {
        let candidate = head.trim().to_lowercase();
        if known_names.contains(&candidate) {
            return (candidate, rest.trim().to_owned(), true);
        }
    }

    // @name rest
    if let Some(after) = trimmed.strip_prefix('@') {
        let (head, rest) = after
            .split_once(char::is_whitespace)
            .unwrap_or((after, ""));
        let candidate = head.trim_end_matches([',', '!', '.']).to_lowercase();
        if known_names.contains(&candidate) {
            return (candidate, rest.trim().to_owned(), true);
        }
    }

    // hey name, rest / hi name, rest
    let lower = trimmed.to_lowercase();
    for greeting in ["hey ", "hi "] {
        if let Some(after) = lower.strip_prefix(greeting) {
            if let Some((head, _)) = after.split_once([',', ' ']) {
                let candidate = head.to_lowercase();
                if known_names.contains(&candidate) {
                    let offset = greeting.len() + head.len();
                    let rest = trimmed[offset..]
                        .trim_start_matches([',', ' '])
                        .to_owned();
                    return (candidate, rest, true);
                }
            }
        }
    }

    (default.to_owned(), trimmed.to_owned(), false)
}

/// Also match `@name` anywhere in the text, for mid-sentence addressing.
#[must_use]
pub fn find_inline_mention(text: &str, known_names: &[String]) -> Option<String> {
    for token in text.split_whitespace() {
        if let Some(name) = token.strip_prefix('@') {
            let candidate = name.trim_end_matches([',', '!', '.', '?']).to_lowercase();
            if known_names.contains(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

/// Bounded LRU of which instance owns which conversation.
///
/// In-memory only; loss across restart is acceptable by design. Eviction
/// uses lazy deletion: every touch appends a sequenced entry, stale queue
/// entries are skipped at eviction time.
pub struct ThreadOwnerMap {
    capacity: usize,
    inner: Mutex<OwnerInner>,
}

struct OwnerInner {
    map: HashMap<String, (String, u64)>,
    order: VecDeque<(String, u64)>,
    seq: u64,
}

impl ThreadOwnerMap {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(OwnerInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                seq: 0,
            }),
        }
    }

    /// Record ownership. Explicit re-addressing overwrites.
    pub fn set(&self, conversation_id: &str, owner: &str) {
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let seq = inner.seq;
        inner
            .map
            .insert(conversation_id.to_owned(), (owner.to_owned(), seq));
        inner.order.push_back((conversation_id.to_owned(), seq));

        while inner.map.len() > self.capacity {
            let Some((key, seq)) = inner.order.pop_front() else {
                break;
            };
            let is_current = inner.map.get(&key).is_some_and(|(_, s)| *s == seq);
            if is_current {
                inner.map.remove(&key);
            }
        }
        // Drop stale queue heads so the deque stays proportional.
        while inner.order.len() > self.capacity.saturating_mul(2) {
            let Some((key, seq)) = inner.order.pop_front() else {
                break;
            };
            let is_current = inner.map.get(&key).is_some_and(|(_, s)| *s == seq);
            if is_current {
                inner.order.push_front((key, seq));
                break;
            }
        }
    }

    #[must_use]
    pub fn get(&self, conversation_id: &str) -> Option<String> {
        self.inner
            .lock()
            .map
            .get(conversation_id)
            .map(|(owner, _)| owner.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }
}

/// Caches parsed channel routing config from Slack channel topics.
pub struct ChannelTopicCache {
    gateway: Arc<dyn SlackGateway>,
    instance_names: Vec<String>,
    ttl: Duration,
    cache: Mutex<HashMap<String, (ChannelConfig, Instant)>>,
}

impl ChannelTopicCache {
    #[must_use]
    pub fn new(gateway: Arc<dyn SlackGateway>, instance_names: Vec<String>) -> Self {
        Self {
            gateway,
            instance_names,
            ttl: Duration::from_secs(60),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Routing config for a channel, parsed from its topic. Cached.
    pub async fn get(&self, channel_id: &str) -> ChannelConfig {
        if let Some((config, at)) = self.cache.lock().get(channel_id) {
            if at.elapsed() < self.ttl {
                return config.clone();
            }
        }

        let (topic, name) = match self.gateway.channel_info(channel_id).await {
            Ok(info) => (info.topic, info.name),
            Err(err) => {
                warn!(channel_id, %err, "could not fetch channel info");
                (String::new(), String::new())
            }
        };

        let mut config = parse_channel_topic(&topic, &self.instance_names);
        config.name = name;
        debug!(channel_id, ?config, "channel config refreshed");
        self.cache
            .lock()
            .insert(channel_id.to_owned(), (config.clone(), Instant::now()));
        config
    }
}
