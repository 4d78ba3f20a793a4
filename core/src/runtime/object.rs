use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use rustc_hash::FxHashMap;

use crate::error::{EngineError, EngineResult};

use super::Val;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Property map with an optional proto link. Scope objects chain through the
/// same link, so walking `depth` protos reaches an enclosing scope.
#[derive(Clone)]
pub struct ScriptObject(Arc<ObjectInner>);

struct ObjectInner {
    id: u64,
    props: RwLock<FxHashMap<Arc<str>, Val>>,
    proto: Option<ScriptObject>,
    is_scope: bool,
}

impl ScriptObject {
    pub fn new() -> Self {
        Self::build(None, false)
    }

    pub fn with_proto(proto: ScriptObject) -> Self {
        Self::build(Some(proto), false)
    }

    /// A scope object whose parent scope is `parent`.
    pub fn scope(parent: Option<ScriptObject>) -> Self {
        Self::build(parent, true)
    }

    fn build(proto: Option<ScriptObject>, is_scope: bool) -> Self {
        ScriptObject(Arc::new(ObjectInner {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            props: RwLock::new(FxHashMap::default()),
            proto,
            is_scope,
        }))
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    #[inline]
    pub fn is_scope(&self) -> bool {
        self.0.is_scope
    }

    #[inline]
    pub fn ptr_eq(&self, other: &ScriptObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    #[inline]
    pub fn proto(&self) -> Option<&ScriptObject> {
        self.0.proto.as_ref()
    }

    pub fn set(&self, name: &str, value: Val) -> Option<Val> {
        let mut props = self.0.props.write().unwrap_or_else(PoisonError::into_inner);
        props.insert(Arc::from(name), value)
    }

    pub fn get_own(&self, name: &str) -> Option<Val> {
        let props = self.0.props.read().unwrap_or_else(PoisonError::into_inner);
        props.get(name).cloned()
    }

    pub fn has_own(&self, name: &str) -> bool {
        let props = self.0.props.read().unwrap_or_else(PoisonError::into_inner);
        props.contains_key(name)
    }

    /// Look up `name` along the proto chain, returning the holder and the value.
    pub fn find(&self, name: &str) -> Option<(ScriptObject, Val)> {
        let mut current = Some(self);
        while let Some(obj) = current {
            if let Some(v) = obj.get_own(name) {
                return Some((obj.clone(), v));
            }
            current = obj.proto();
        }
        None
    }

    /// Walk exactly `depth` proto links.
    pub fn get_proto(&self, depth: u32) -> EngineResult<ScriptObject> {
        let mut current = self.clone();
        for hop in 0..depth {
            current = match current.proto() {
                Some(p) => p.clone(),
                None => {
                    return Err(EngineError::internal(format!(
                        "scope chain ends after {hop} of {depth} levels"
                    )));
                }
            };
        }
        Ok(current)
    }

    /// Generated-code entry point: negative depth means the target scope is not
    /// statically known and the dynamic lookup starts at `self`.
    pub fn get_proto_depth(&self, depth: i32) -> EngineResult<ScriptObject> {
        if depth < 0 {
            return Ok(self.clone());
        }
        self.get_proto(depth as u32)
    }

    pub fn keys(&self) -> Vec<Arc<str>> {
        let props = self.0.props.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<Arc<str>> = props.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for ScriptObject {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptObject")
            .field("id", &self.0.id)
            .field("scope", &self.0.is_scope)
            .field("keys", &self.keys())
            .finish()
    }
}
