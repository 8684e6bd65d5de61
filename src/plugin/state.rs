//! Per-session and per-root state owned by the plugin
//!
//! Everything lives in process memory. Session entries are dropped on
//! `session.deleted`; per-message gating state is bounded and evicts oldest first.

use super::classifier::TriggerSet;
use super::host::MessageInfo;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Cap for the notified-id set and the gating map
pub const MAX_TRACKED_ENTRIES: usize = 100;
const DIGEST_CHARS: usize = 200;
const SAME_MESSAGE_WINDOW: Duration = Duration::from_secs(2);
/// Gating key used before any user message has been keyed
pub const DEFAULT_MESSAGE_KEY: &str = "default";

/// Insertion-ordered map that evicts its oldest entry beyond `cap`
#[derive(Debug)]
pub struct BoundedMap<K, V> {
    cap: usize,
    order: VecDeque<K>,
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V> BoundedMap<K, V> {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_or_insert_with(&mut self, key: K, default: impl FnOnce() -> V) -> &mut V {
        if !self.entries.contains_key(&key) {
            while self.entries.len() >= self.cap.max(1) {
                match self.order.pop_front() {
                    Some(oldest) => {
                        self.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
            self.order.push_back(key.clone());
        }
        self.entries.entry(key).or_insert_with(default)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.entries.retain(|k, _| keep(k));
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
    }
}

/// Insertion-ordered set that evicts its oldest member beyond `cap`
#[derive(Debug)]
pub struct BoundedSet<T> {
    inner: BoundedMap<T, ()>,
}

impl<T: Eq + Hash + Clone> BoundedSet<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: BoundedMap::new(cap),
        }
    }

    /// Returns false when the value was already present
    pub fn insert(&mut self, value: T) -> bool {
        if self.inner.contains_key(&value) {
            return false;
        }
        self.inner.get_or_insert_with(value, || ());
        true
    }

    pub fn contains(&self, value: &T) -> bool {
        self.inner.contains_key(value)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Reminder state for one (session, project root)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootState {
    pub files_modified: Vec<PathBuf>,
    pub has_new_requirement: bool,
    pub has_tech_decision: bool,
    pub has_bug_fix: bool,
    pub memory_bank_reviewed: bool,
    pub skip_init: bool,
    pub init_reminder_fired: bool,
    pub last_update_signature: Option<String>,
    pub last_synced_signature: Option<String>,
}

impl RootState {
    /// Fold a classified user message into the trigger flags
    pub fn apply(&mut self, triggers: &TriggerSet) {
        self.has_new_requirement |= triggers.new_requirement;
        self.has_tech_decision |= triggers.tech_decision;
        self.has_bug_fix |= triggers.bug_fix;
        if triggers.skip_init {
            self.skip_init = true;
        } else if triggers.reviewed {
            self.memory_bank_reviewed = true;
        }
    }

    /// Stable signature over sorted modified files and trigger flags
    pub fn signature(&self) -> String {
        let mut files: Vec<String> = self
            .files_modified
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        files.sort();
        json!({
            "files": files,
            "flags": {
                "hasNewRequirement": self.has_new_requirement,
                "hasTechDecision": self.has_tech_decision,
                "hasBugFix": self.has_bug_fix,
            }
        })
        .to_string()
    }
}

#[derive(Debug)]
pub struct SessionMeta {
    pub parent_id: Option<String>,
    pub roots_touched: HashSet<PathBuf>,
    pub last_active_root: PathBuf,
    pub notified: BoundedSet<String>,
    pub plan_outputted: bool,
    pub prompt_in_progress: bool,
    pub user_message_received: bool,
    pub user_message_seq: u64,
    pub last_user_digest: Option<String>,
    pub last_user_at: Option<Instant>,
    pub last_user_message_key: Option<String>,
}

impl SessionMeta {
    pub fn new(root: &Path) -> Self {
        Self {
            parent_id: None,
            roots_touched: HashSet::new(),
            last_active_root: root.to_path_buf(),
            notified: BoundedSet::new(MAX_TRACKED_ENTRIES),
            plan_outputted: false,
            prompt_in_progress: false,
            user_message_received: false,
            user_message_seq: 0,
            last_user_digest: None,
            last_user_at: None,
            last_user_message_key: None,
        }
    }

    pub fn gating_key(&self) -> String {
        self.last_user_message_key
            .clone()
            .unwrap_or_else(|| DEFAULT_MESSAGE_KEY.to_string())
    }

    /// Key a user message: host id, else creation time, else a sequence number
    /// that is reused when the same content arrives again within two seconds
    pub fn message_key(&mut self, message: &MessageInfo, now: Instant) -> Option<String> {
        let key = if let Some(id) = message.id.as_deref().filter(|id| !id.is_empty()) {
            id.to_string()
        } else if let Some(created) = message.created {
            format!("ts:{}", created)
        } else {
            let trimmed = message.content.trim();
            if trimmed.is_empty() {
                return None;
            }
            let digest: String = trimmed.chars().take(DIGEST_CHARS).collect();
            let repeated = self.last_user_digest.as_deref() == Some(digest.as_str())
                && self
                    .last_user_at
                    .is_some_and(|at| now.duration_since(at) < SAME_MESSAGE_WINDOW);
            if let (true, Some(key)) = (repeated, self.last_user_message_key.clone()) {
                return Some(key);
            }
            self.user_message_seq += 1;
            self.last_user_digest = Some(digest);
            self.last_user_at = Some(now);
            format!("seq:{}", self.user_message_seq)
        };

        self.last_user_message_key = Some(key.clone());
        Some(key)
    }
}

/// Read/write obligations for one user turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageGatingState {
    pub read_files: HashSet<String>,
    pub context_satisfied: bool,
    pub warned_this_message: bool,
    pub doc_first_satisfied: bool,
    pub doc_first_warned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryState {
    pub anchor_paths: Vec<String>,
    pub read_files: HashSet<String>,
    pub activated_at: SystemTime,
}

impl RecoveryState {
    pub fn new(anchor_paths: Vec<String>) -> Self {
        Self {
            anchor_paths,
            read_files: HashSet::new(),
            activated_at: SystemTime::now(),
        }
    }

    pub fn all_read(&self) -> bool {
        self.anchor_paths.iter().all(|p| self.read_files.contains(p))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionAnchorState {
    /// Recently read anchor files, most recent last
    pub anchors_lru: Vec<String>,
    pub recovery: Option<RecoveryState>,
    pub compaction_count: u32,
}

/// Owns all plugin state, keyed by session
#[derive(Debug)]
pub struct SessionRegistry {
    root: PathBuf,
    sessions: HashMap<String, SessionMeta>,
    roots: HashMap<(String, PathBuf), RootState>,
    gating: BoundedMap<(String, String), MessageGatingState>,
    anchors: HashMap<String, SessionAnchorState>,
}

impl SessionRegistry {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            sessions: HashMap::new(),
            roots: HashMap::new(),
            gating: BoundedMap::new(MAX_TRACKED_ENTRIES),
            anchors: HashMap::new(),
        }
    }

    pub fn session_created(&mut self, session_id: &str, parent_id: Option<String>) {
        let mut meta = SessionMeta::new(&self.root);
        meta.parent_id = parent_id;
        self.sessions.insert(session_id.to_string(), meta);
    }

    pub fn session_deleted(&mut self, session_id: &str) {
        if let Some(meta) = self.sessions.remove(session_id) {
            for root in meta.roots_touched {
                self.roots.remove(&(session_id.to_string(), root));
            }
        }
        self.roots.retain(|(sid, _), _| sid != session_id);
        self.gating.retain(|(sid, _)| sid != session_id);
        self.anchors.remove(session_id);
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn meta(&mut self, session_id: &str) -> &mut SessionMeta {
        let root = &self.root;
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionMeta::new(root))
    }

    pub fn root_state(&mut self, session_id: &str, root: &Path) -> &mut RootState {
        self.meta(session_id).roots_touched.insert(root.to_path_buf());
        self.roots
            .entry((session_id.to_string(), root.to_path_buf()))
            .or_default()
    }

    /// Gating state for the session's current user turn
    pub fn gating(&mut self, session_id: &str) -> &mut MessageGatingState {
        let key = self.meta(session_id).gating_key();
        self.gating
            .get_or_insert_with((session_id.to_string(), key), MessageGatingState::default)
    }

    pub fn anchors(&mut self, session_id: &str) -> &mut SessionAnchorState {
        self.anchors.entry(session_id.to_string()).or_default()
    }

    pub fn gating_len(&self) -> usize {
        self.gating.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_map_evicts_oldest() {
        let mut map = BoundedMap::new(2);
        *map.get_or_insert_with("a", || 0) += 1;
        map.get_or_insert_with("b", || 0);
        map.get_or_insert_with("c", || 0);
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key(&"a"));
        assert!(map.contains_key(&"c"));
    }

    #[test]
    fn test_bounded_set_insert() {
        let mut set = BoundedSet::new(MAX_TRACKED_ENTRIES);
        assert!(set.insert("m1".to_string()));
        assert!(!set.insert("m1".to_string()));
        for i in 0..150 {
            set.insert(format!("k{}", i));
        }
        assert_eq!(set.len(), MAX_TRACKED_ENTRIES);
        assert!(!set.contains(&"m1".to_string()));
    }

    #[test]
    fn test_signature_ignores_file_order() {
        let mut a = RootState::default();
        a.files_modified = vec![PathBuf::from("/p/b.rs"), PathBuf::from("/p/a.rs")];
        let mut b = RootState::default();
        b.files_modified = vec![PathBuf::from("/p/a.rs"), PathBuf::from("/p/b.rs")];
        assert_eq!(a.signature(), b.signature());

        b.has_bug_fix = true;
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn test_apply_skip_init_wins_over_reviewed() {
        let mut state = RootState::default();
        state.apply(&TriggerSet {
            skip_init: true,
            reviewed: true,
            ..Default::default()
        });
        assert!(state.skip_init);
        assert!(!state.memory_bank_reviewed);
    }

    #[test]
    fn test_message_key_sources() {
        let mut meta = SessionMeta::new(Path::new("/p"));
        let now = Instant::now();

        let with_id = MessageInfo::user("hi").with_id("m1");
        assert_eq!(meta.message_key(&with_id, now).as_deref(), Some("m1"));

        let mut with_ts = MessageInfo::user("hi");
        with_ts.created = Some(42);
        assert_eq!(meta.message_key(&with_ts, now).as_deref(), Some("ts:42"));

        assert_eq!(meta.message_key(&MessageInfo::user("   "), now), None);
    }

    #[test]
    fn test_message_key_reuses_within_window() {
        let mut meta = SessionMeta::new(Path::new("/p"));
        let now = Instant::now();
        let msg = MessageInfo::user("add a login page");

        let first = meta.message_key(&msg, now).unwrap();
        let repeat = meta.message_key(&msg, now + Duration::from_millis(500)).unwrap();
        let later = meta.message_key(&msg, now + Duration::from_secs(5)).unwrap();
        assert_eq!(first, "seq:1");
        assert_eq!(repeat, "seq:1");
        assert_eq!(later, "seq:2");
        assert_eq!(meta.gating_key(), "seq:2");
    }

    #[test]
    fn test_session_deleted_drops_everything() {
        let root = Path::new("/p");
        let mut registry = SessionRegistry::new(root);
        registry.session_created("s1", None);
        registry.root_state("s1", root).has_bug_fix = true;
        registry.gating("s1").context_satisfied = true;
        registry.anchors("s1").compaction_count = 2;

        registry.session_deleted("s1");
        assert!(!registry.has_session("s1"));
        assert_eq!(registry.gating_len(), 0);
        assert!(!registry.root_state("s1", root).has_bug_fix);
        assert_eq!(registry.anchors("s1").compaction_count, 0);
    }

    #[test]
    fn test_gating_state_is_per_turn() {
        let root = Path::new("/p");
        let mut registry = SessionRegistry::new(root);
        registry.gating("s1").warned_this_message = true;

        let now = Instant::now();
        registry.meta("s1").message_key(&MessageInfo::user("next").with_id("m2"), now);
        assert!(!registry.gating("s1").warned_this_message);
    }
}
