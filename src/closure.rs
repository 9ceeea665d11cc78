//! Transitive dependency closure.
//!
//! Iterative worklist over canonical paths: pop a binary, parse its
//! dependency record (cached), resolve each reference, apply the
//! deployment filter, push unseen children. A reference that fails to
//! resolve is fatal when its name looks like a Qt library and silently
//! skipped otherwise; the target system is expected to provide it.

use anyhow::Result;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::deps::{canonical_key, ParseCache};
use crate::error::DeployError;
use crate::filter::{is_qt_library_name, should_deploy};
use crate::host;
use crate::resolve::{resolve_ref, ResolveContext};

/// Compute the closure of library dependencies reachable from `seeds`.
///
/// The seeds themselves are visited (their records drive the traversal)
/// but excluded from the result; the caller already has them. The
/// result order follows first-visit order and carries no further
/// guarantee. `tag` labels the verbose trace lines for this pass.
pub fn library_closure(
    seeds: &[PathBuf],
    ctx: &ResolveContext,
    cache: &mut ParseCache,
    tag: &str,
) -> Result<Vec<PathBuf>> {
    let seed_keys: HashSet<PathBuf> = seeds.iter().map(|p| canonical_key(p)).collect();

    let mut stack: Vec<PathBuf> = seeds.to_vec();
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut out: Vec<PathBuf> = Vec::new();

    while let Some(current) = stack.pop() {
        let key = canonical_key(&current);
        if !visited.insert(key.clone()) {
            continue;
        }
        if host::verbose() {
            println!("[{}] inspect: {}", tag, key.display());
        }
        if !seed_keys.contains(&key) {
            out.push(key.clone());
        }

        let record = cache.record(&key, ctx.plan.kind);
        for dep in &record.needed {
            if host::verbose() {
                println!("[{}]   dep: {}", tag, dep);
            }
            match resolve_ref(dep, &key, &record, ctx, cache) {
                Some(found) => {
                    if should_deploy(&found, ctx.plan.kind, ctx) {
                        if host::verbose() {
                            println!("[{}]     push: {}", tag, found.display());
                        }
                        stack.push(found);
                    }
                }
                None => {
                    if is_qt_library_name(dep) {
                        return Err(DeployError::QtLibraryNotFound(dep.clone()).into());
                    }
                }
            }
        }
    }

    Ok(out)
}

/// Closure of the main binary's dependencies: seeds the traversal with
/// the binary itself, so the result is exactly the libraries to stage.
pub fn main_binary_closure(ctx: &ResolveContext, cache: &mut ParseCache) -> Result<Vec<PathBuf>> {
    library_closure(std::slice::from_ref(&ctx.plan.binary), ctx, cache, "resolve")
}

/// Closure seeded by already-staged plugin libraries, used for the QML
/// plugin pass. Same traversal, fresh cache supplied by the caller.
pub fn plugin_closure(
    plugins: &[PathBuf],
    ctx: &ResolveContext,
    cache: &mut ParseCache,
) -> Result<Vec<PathBuf>> {
    library_closure(plugins, ctx, cache, "qml-deps")
}
