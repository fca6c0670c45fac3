// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-document transform hook.
//!
//! A hook is a pure `Document -> Document` mapping. The engine strips the
//! source `_id` before the hook sees a document and again from whatever the
//! hook returns, so the id never reaches the index.
//!
//! | Hook | Use |
//! |------|-----|
//! | [`Identity`] | default, no script configured |
//! | [`FnTransform`] | embedding the engine in another Rust program |
//! | [`LuaTransform`] | operator-supplied Lua 5.4 script |
//!
//! # Lua scripts
//!
//! A script either returns a table with a `transform` function, returns the
//! function itself, or defines a global `transform`:
//!
//! ```lua
//! function transform(doc)
//!   doc.full_name = doc.first .. " " .. doc.last
//!   return doc
//! end
//! ```
//!
//! JSON `null` reaches the script as the global `null` (assigning `nil`
//! removes a field instead), and arrays keep their array-ness even when
//! empty. Fields come back in their input order.
//!
//! The VM is sandboxed: `os`, `io`, `debug`, `loadfile` and `dofile` are
//! removed. A script without a callable `transform` is rejected at load time.

use crate::document::{strip_source_id, Document};
use crate::error::{Result, SyncError};
use mlua::prelude::*;
use mlua::{DeserializeOptions, LuaSerdeExt, SerializeOptions};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A pure per-document mapping, validated before the run starts.
pub trait TransformHook: Send + Sync {
    /// Map one document. An error here is fatal for the run.
    fn transform(&self, doc: Document) -> Result<Document>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Passes documents through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl TransformHook for Identity {
    fn transform(&self, doc: Document) -> Result<Document> {
        Ok(doc)
    }

    fn name(&self) -> &str {
        "identity"
    }
}

/// Wraps a Rust closure.
pub struct FnTransform<F> {
    name: String,
    f: F,
}

impl<F> FnTransform<F>
where
    F: Fn(Document) -> Document + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> TransformHook for FnTransform<F>
where
    F: Fn(Document) -> Document + Send + Sync,
{
    fn transform(&self, doc: Document) -> Result<Document> {
        Ok((self.f)(doc))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

const TRANSFORM_FN_KEY: &str = "index_sync.transform";

/// A `transform(doc)` function defined by a Lua script.
pub struct LuaTransform {
    name: String,
    lua: Mutex<Lua>,
}

impl std::fmt::Debug for LuaTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaTransform")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl LuaTransform {
    /// Load a script from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read transform script {}: {}", path.display(), e))
        })?;
        Self::from_source(&path.display().to_string(), &src)
    }

    /// Load a script from source text and resolve its `transform` function.
    pub fn from_source(name: &str, src: &str) -> Result<Self> {
        let config_err = |e: LuaError| {
            SyncError::Config(format!("transform script {}: {}", name, e))
        };

        let lua = Lua::new();
        sandbox_globals(&lua).map_err(config_err)?;

        let returned: LuaValue = lua
            .load(src)
            .set_name(name)
            .eval()
            .map_err(config_err)?;

        let candidate = match returned {
            LuaValue::Function(f) => LuaValue::Function(f),
            LuaValue::Table(module) => module.get::<LuaValue>("transform").map_err(config_err)?,
            _ => lua.globals().get::<LuaValue>("transform").map_err(config_err)?,
        };

        let LuaValue::Function(func) = candidate else {
            return Err(SyncError::Config(format!(
                "transform script {} must define a callable `transform` (found {})",
                name,
                candidate.type_name()
            )));
        };

        lua.set_named_registry_value(TRANSFORM_FN_KEY, func)
            .map_err(config_err)?;

        Ok(Self {
            name: name.to_string(),
            lua: Mutex::new(lua),
        })
    }
}

impl TransformHook for LuaTransform {
    fn transform(&self, doc: Document) -> Result<Document> {
        let lua = self
            .lua
            .lock()
            .map_err(|_| SyncError::Internal("transform VM lock poisoned".into()))?;
        let runtime_err = |e: LuaError| SyncError::Transform(format!("{}: {}", self.name, e));

        let func: LuaFunction = lua
            .named_registry_value(TRANSFORM_FN_KEY)
            .map_err(runtime_err)?;
        let original = Value::Object(doc);
        let input = json_value_to_lua(&lua, &original).map_err(runtime_err)?;
        let output: LuaValue = func.call(input).map_err(runtime_err)?;

        if !matches!(output, LuaValue::Table(_)) {
            return Err(SyncError::Transform(format!(
                "{}: transform returned {}, expected a table",
                self.name,
                output.type_name()
            )));
        }
        let converted = lua_value_to_json(&lua, output).map_err(runtime_err)?;
        match restore_key_order(&original, converted) {
            Value::Object(map) => Ok(map),
            other => Err(SyncError::Transform(format!(
                "{}: transform returned an array ({}), expected a document",
                self.name, other
            ))),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Build the configured hook: identity without a script.
pub fn load(script: Option<&Path>) -> Result<Arc<dyn TransformHook>> {
    match script {
        Some(path) => {
            let hook = LuaTransform::from_file(path)?;
            tracing::info!(script = %path.display(), "Loaded transform script");
            Ok(Arc::new(hook))
        }
        None => Ok(Arc::new(Identity)),
    }
}

/// Run `hook` over the fields of a source document, with `_id` stripped
/// on both sides.
pub fn apply(hook: &dyn TransformHook, fields: Document) -> Result<Document> {
    let out = hook.transform(strip_source_id(fields))?;
    Ok(strip_source_id(out))
}

// ═══════════════════════════════════════════════════════════════════════
// Lua helpers
// ═══════════════════════════════════════════════════════════════════════

fn sandbox_globals(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    for name in ["os", "io", "loadfile", "dofile", "debug"] {
        globals.set(name, LuaValue::Nil)?;
    }
    globals.set("null", lua.null())?;
    Ok(())
}

fn json_value_to_lua(lua: &Lua, value: &Value) -> LuaResult<LuaValue> {
    // nulls become `null`, arrays carry the array metatable so `[]` survives
    lua.to_value_with(value, SerializeOptions::new())
}

fn lua_value_to_json(lua: &Lua, value: LuaValue) -> LuaResult<Value> {
    lua.from_value_with(value, DeserializeOptions::new())
}

/// Lua tables are unordered. Put fields the input already had back in their
/// input order; fields the script added follow, sorted by name.
fn restore_key_order(template: &Value, value: Value) -> Value {
    match (template, value) {
        (Value::Object(before), Value::Object(mut after)) => {
            let mut ordered = Document::new();
            for (key, old) in before {
                if let Some(new) = after.remove(key) {
                    ordered.insert(key.clone(), restore_key_order(old, new));
                }
            }
            let mut added: Vec<_> = after.into_iter().collect();
            added.sort_by(|a, b| a.0.cmp(&b.0));
            ordered.extend(added);
            Value::Object(ordered)
        }
        (Value::Array(before), Value::Array(after)) => Value::Array(
            after
                .into_iter()
                .enumerate()
                .map(|(i, v)| match before.get(i) {
                    Some(old) => restore_key_order(old, v),
                    None => v,
                })
                .collect(),
        ),
        (_, value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_identity() {
        let d = doc(json!({"a": 1}));
        assert_eq!(Identity.transform(d.clone()).unwrap(), d);
        assert_eq!(Identity.name(), "identity");
    }

    #[test]
    fn test_apply_strips_id_before_hook() {
        let hook = FnTransform::new("assert-no-id", |d: Document| {
            assert!(!d.contains_key("_id"));
            d
        });
        let out = apply(&hook, doc(json!({"_id": 1, "a": 2}))).unwrap();
        assert_eq!(out, doc(json!({"a": 2})));
    }

    #[test]
    fn test_apply_strips_id_reintroduced_by_hook() {
        let hook = FnTransform::new("sneaky", |mut d: Document| {
            d.insert("_id".into(), json!("again"));
            d
        });
        let out = apply(&hook, doc(json!({"_id": 1, "a": 2}))).unwrap();
        assert!(!out.contains_key("_id"));
    }

    #[test]
    fn test_lua_global_function() {
        let hook = LuaTransform::from_source(
            "global.lua",
            r#"
            function transform(doc)
              doc.full = doc.first .. " " .. doc.last
              doc.last = nil
              return doc
            end
            "#,
        )
        .unwrap();
        let out = hook.transform(doc(json!({"first": "Ada", "last": "L"}))).unwrap();
        assert_eq!(out.get("full"), Some(&json!("Ada L")));
        assert_eq!(out.get("first"), Some(&json!("Ada")));
        assert!(!out.contains_key("last"));
        assert_eq!(hook.name(), "global.lua");
    }

    #[test]
    fn test_lua_pass_through_keeps_document_intact() {
        let hook =
            LuaTransform::from_source("noop.lua", "function transform(d) return d end").unwrap();
        let input = doc(json!({
            "z": 1,
            "a": null,
            "m": 2.5,
            "tags": [1, null, 3],
            "empty": [],
            "nested": {"y": [], "b": {}, "x": null}
        }));
        let out = hook.transform(input.clone()).unwrap();
        assert_eq!(out, input);
        let keys: Vec<_> = out.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m", "tags", "empty", "nested"]);
        let nested: Vec<_> = out["nested"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(nested, vec!["y", "b", "x"]);
    }

    #[test]
    fn test_lua_null_global_and_added_fields() {
        let hook = LuaTransform::from_source(
            "nulls.lua",
            r#"
            function transform(doc)
              doc.was_null = (doc.gone == null)
              doc.gone = nil
              doc.cleared = null
              doc.b_added = {}
              return doc
            end
            "#,
        )
        .unwrap();
        let out = hook.transform(doc(json!({"k": 1, "gone": null}))).unwrap();
        let keys: Vec<_> = out.keys().cloned().collect();
        assert_eq!(keys, vec!["k", "b_added", "cleared", "was_null"]);
        assert_eq!(out["cleared"], Value::Null);
        assert_eq!(out["was_null"], json!(true));
    }

    #[test]
    fn test_lua_module_table() {
        let hook = LuaTransform::from_source(
            "module.lua",
            r#"
            local M = {}
            function M.transform(doc)
              doc.n = doc.n * 2
              doc.tags = { "a", "b" }
              return doc
            end
            return M
            "#,
        )
        .unwrap();
        let out = hook.transform(doc(json!({"n": 21}))).unwrap();
        assert_eq!(out.get("n"), Some(&json!(42)));
        assert_eq!(out.get("tags"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn test_lua_returned_function() {
        let hook = LuaTransform::from_source(
            "fn.lua",
            "return function(doc) doc.seen = true return doc end",
        )
        .unwrap();
        let out = hook.transform(doc(json!({}))).unwrap();
        assert_eq!(out.get("seen"), Some(&json!(true)));
    }

    #[test]
    fn test_lua_missing_transform_is_config_error() {
        let err = LuaTransform::from_source("empty.lua", "local x = 1").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(err.to_string().contains("callable"));
    }

    #[test]
    fn test_lua_non_callable_transform_is_config_error() {
        let err = LuaTransform::from_source("bad.lua", "transform = 42").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_lua_syntax_error_is_config_error() {
        let err = LuaTransform::from_source("broken.lua", "function transform(").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_lua_sandboxed() {
        let err = LuaTransform::from_source("escape.lua", "os.execute('true')").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));

        let hook = LuaTransform::from_source(
            "globals.lua",
            "function transform(doc) doc.io = (io == nil) return doc end",
        )
        .unwrap();
        let out = hook.transform(Document::new()).unwrap();
        assert_eq!(out.get("io"), Some(&json!(true)));
    }

    #[test]
    fn test_lua_runtime_error_is_transform_error() {
        let hook =
            LuaTransform::from_source("err.lua", "function transform(doc) error('nope') end")
                .unwrap();
        let err = hook.transform(Document::new()).unwrap_err();
        assert!(matches!(err, SyncError::Transform(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_lua_non_table_result_is_transform_error() {
        let hook =
            LuaTransform::from_source("nil.lua", "function transform(doc) return nil end").unwrap();
        let err = hook.transform(Document::new()).unwrap_err();
        assert!(err.to_string().contains("nil"));

        let hook = LuaTransform::from_source(
            "array.lua",
            "function transform(doc) return { 1, 2 } end",
        )
        .unwrap();
        assert!(matches!(hook.transform(Document::new()), Err(SyncError::Transform(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upper.lua");
        std::fs::write(
            &path,
            "function transform(doc) doc.name = string.upper(doc.name) return doc end",
        )
        .unwrap();

        let hook = load(Some(&path)).unwrap();
        let out = hook.transform(doc(json!({"name": "ada"}))).unwrap();
        assert_eq!(out.get("name"), Some(&json!("ADA")));

        assert_eq!(load(None).unwrap().name(), "identity");
        assert!(matches!(
            load(Some(&dir.path().join("missing.lua"))),
            Err(SyncError::Config(_))
        ));
    }
}
