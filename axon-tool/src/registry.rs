//! The tool registry: toolset registrations, per-tool specs, and the
//! codec-driven marshal/unmarshal entry points.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use axon_types::{CodecError, RegistryError};

use crate::codec::ToolValue;
use crate::spec::ToolSpec;
use crate::toolset::ToolsetRegistration;

/// Which of a tool's two type specs a codec operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    /// The payload spec.
    Payload,
    /// The result spec.
    Result,
}

/// Maps unregistered tool names to registered ones, e.g. when a planner
/// emits a provider-prefixed alias.
pub trait ToolNameRewriter: Send + Sync {
    /// The registered name for `name`, or `None` when no rewrite exists.
    fn rewrite(&self, name: &str) -> Option<String>;
}

#[derive(Default)]
struct Inner {
    toolsets: HashMap<String, Arc<ToolsetRegistration>>,
    specs: HashMap<String, Arc<ToolSpec>>,
    rewriter: Option<Arc<dyn ToolNameRewriter>>,
}

/// Registry of toolsets and tool specs.
///
/// The runtime consults it by tool name only — it holds type-erased
/// codecs and never sees generated types. Guarded by a read/write lock;
/// lookups clone the `Arc`s out so no lock is held across awaits.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a toolset. Idempotent by toolset name: re-registering a
    /// name already present is a no-op. Fails when a tool name collides
    /// with one claimed by a different toolset.
    pub fn register_toolset(&self, registration: ToolsetRegistration) -> Result<(), RegistryError> {
        let mut inner = self.write();
        if inner.toolsets.contains_key(&registration.name) {
            return Ok(());
        }
        for tool in &registration.tools {
            if let Some(existing) = inner.specs.get(&tool.name) {
                return Err(RegistryError::ToolCollision {
                    tool: tool.name.clone(),
                    existing: existing.toolset.clone(),
                });
            }
        }
        for tool in &registration.tools {
            let mut spec = tool.clone();
            spec.toolset = registration.name.clone();
            inner.specs.insert(tool.name.clone(), Arc::new(spec));
        }
        inner
            .toolsets
            .insert(registration.name.clone(), Arc::new(registration));
        Ok(())
    }

    /// Install the unknown-tool rewriter.
    pub fn set_rewriter(&self, rewriter: Arc<dyn ToolNameRewriter>) {
        self.write().rewriter = Some(rewriter);
    }

    /// Look up a tool spec by name.
    pub fn tool_spec(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.read().specs.get(name).cloned()
    }

    /// Look up a toolset registration by name.
    pub fn toolset(&self, name: &str) -> Option<Arc<ToolsetRegistration>> {
        self.read().toolsets.get(name).cloned()
    }

    /// The toolset registration owning `tool`.
    pub fn toolset_for(&self, tool: &str) -> Option<Arc<ToolsetRegistration>> {
        let inner = self.read();
        let spec = inner.specs.get(tool)?;
        inner.toolsets.get(&spec.toolset).cloned()
    }

    /// Resolve a possibly-unregistered tool name: registered names pass
    /// through; otherwise the rewriter is consulted. `None` means the
    /// name cannot be resolved.
    pub fn resolve_name(&self, name: &str) -> Option<String> {
        let inner = self.read();
        if inner.specs.contains_key(name) {
            return Some(name.to_owned());
        }
        let rewritten = inner.rewriter.as_ref()?.rewrite(name)?;
        inner.specs.contains_key(&rewritten).then_some(rewritten)
    }

    /// All registered tool names, sorted for deterministic iteration.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().specs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Encode a tool value to canonical JSON.
    ///
    /// Bytes that are already valid JSON are returned as a defensive
    /// copy, unchanged. Typed values go through the codec; without a
    /// codec, plain `serde_json::Value`s fall back to generic encoding.
    pub fn marshal_tool_value(
        &self,
        name: &str,
        value: &ToolValue,
        kind: CodecKind,
    ) -> Result<Vec<u8>, CodecError> {
        match value {
            ToolValue::Bytes(bytes) => {
                serde_json::from_slice::<serde::de::IgnoredAny>(bytes)
                    .map_err(|e| CodecError::Syntax(e.to_string()))?;
                Ok(bytes.clone())
            }
            ToolValue::Typed(typed) => {
                let spec = self
                    .tool_spec(name)
                    .ok_or_else(|| CodecError::MissingCodec(name.to_owned()))?;
                let type_spec = match kind {
                    CodecKind::Payload => &spec.payload,
                    CodecKind::Result => &spec.result,
                };
                match &type_spec.codec {
                    Some(codec) => codec.encode(typed.as_ref()),
                    None => generic_encode(name, typed.as_ref()),
                }
            }
        }
    }

    /// Decode canonical JSON into the tool's typed value.
    ///
    /// Decoding requires a codec — an unregistered codec is a contract
    /// violation, never a silent fallback.
    pub fn unmarshal_tool_value(
        &self,
        name: &str,
        raw: &[u8],
        kind: CodecKind,
    ) -> Result<Box<dyn Any + Send>, CodecError> {
        let spec = self
            .tool_spec(name)
            .ok_or_else(|| CodecError::MissingCodec(name.to_owned()))?;
        let type_spec = match kind {
            CodecKind::Payload => &spec.payload,
            CodecKind::Result => &spec.result,
        };
        if type_spec.codec.is_none() {
            return Err(CodecError::MissingCodec(name.to_owned()));
        }
        type_spec.decode(raw)
    }
}

/// Fallback encoding for typed values without a codec: only generic
/// JSON values can be encoded generically.
fn generic_encode(name: &str, value: &(dyn Any + Send)) -> Result<Vec<u8>, CodecError> {
    value
        .downcast_ref::<serde_json::Value>()
        .map(|json| serde_json::to_vec(json).map_err(|e| CodecError::Encode(e.to_string())))
        .unwrap_or_else(|| Err(CodecError::MissingCodec(name.to_owned())))
}
