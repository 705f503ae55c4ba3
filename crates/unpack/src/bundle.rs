//! The unpacked module tree.

use crate::graph::ModuleGraph;
use crate::paths;
use crate::require::{collect_requires, rewrite_requires, ModuleFunction};
use decloak_core::codegen::emit_module;
use decloak_core::matchers::Mappings;
use decloak_utils::errors::{CodegenError, UnpackError};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use swc_core::common::{sync::Lrc, SourceMap};
use swc_core::ecma::ast::{Id, Module};
use tracing::{debug, info, warn};

/// Which loader runtime the bundle was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BundleKind {
    Webpack4,
    Webpack5,
    /// A lazily loaded webpack chunk: modules without a runtime.
    WebpackChunk,
    Browserify,
}

/// One extracted module.
#[derive(Debug, Clone)]
pub struct BundleModule {
    pub id: String,
    pub is_entry: bool,
    /// Path relative to the output directory, `/`-separated.
    pub path: String,
    pub module: Module,
    require: Option<Id>,
}

/// A module initializer as found in the registry, before extraction.
pub(crate) struct RawModule {
    pub(crate) id: String,
    pub(crate) is_entry: bool,
    pub(crate) function: ModuleFunction,
    /// Browserify's per-module `request → id` table.
    pub(crate) dependencies: HashMap<String, String>,
}

/// A bundle split back into modules.
#[derive(Clone)]
pub struct Bundle {
    pub kind: BundleKind,
    pub modules: IndexMap<String, BundleModule>,
    graph: ModuleGraph,
    source_map: Lrc<SourceMap>,
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("kind", &self.kind)
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .field("graph", &self.graph)
            .finish_non_exhaustive()
    }
}

impl Bundle {
    pub(crate) fn build(
        kind: BundleKind,
        raw: Vec<RawModule>,
        roles: &[&str],
        source_map: Lrc<SourceMap>,
        mappings: &Mappings,
    ) -> Self {
        let mut graph = ModuleGraph::new();
        let mut modules = IndexMap::new();
        let mut tables = HashMap::new();
        for raw in raw {
            let (module, require) = raw.function.into_module(roles);
            graph.add_module(&raw.id);
            tables.insert(raw.id.clone(), raw.dependencies);
            modules.insert(
                raw.id.clone(),
                BundleModule {
                    id: raw.id,
                    is_entry: raw.is_entry,
                    path: String::new(),
                    module,
                    require,
                },
            );
        }

        for module in modules.values() {
            let Some(require) = &module.require else {
                continue;
            };
            for call in collect_requires(&module.module, require) {
                let target = match kind {
                    BundleKind::Browserify => tables
                        .get(&module.id)
                        .and_then(|table| table.get(&call.request))
                        .cloned(),
                    _ => Some(call.request.clone()),
                };
                let resolved = target.is_some_and(|t| {
                    graph.add_dependency(&module.id, &t, &call.request, call.binding.as_deref())
                });
                if resolved {
                    continue;
                }
                if kind == BundleKind::Browserify && !is_relative(&call.request) {
                    // An external package the bundle did not include.
                    debug!("module {} requires external '{}'", module.id, call.request);
                } else {
                    warn!(
                        "module {} requires '{}' which is not in the bundle",
                        module.id, call.request
                    );
                }
            }
        }

        let mut bundle = Self {
            kind,
            modules,
            graph,
            source_map,
        };
        bundle.assign_paths(mappings);
        bundle.rewrite_requires();
        info!(
            "Unpacked {:?} bundle: {} modules, {} dependencies",
            kind,
            bundle.graph.module_count(),
            bundle.graph.dependency_count()
        );
        bundle
    }

    /// Default paths, then mapping overrides, then conflict suffixes.
    fn assign_paths(&mut self, mappings: &Mappings) {
        let entries: Vec<String> = self
            .modules
            .values()
            .filter(|m| m.is_entry)
            .map(|m| m.id.clone())
            .collect();

        let mut assigned: HashMap<String, String> = HashMap::new();
        for id in self.graph.traversal_order(&entries) {
            let path = assigned
                .get(id)
                .cloned()
                .unwrap_or_else(|| default_path(id, &entries));
            if self.kind == BundleKind::Browserify {
                for (request, dep) in self.graph.dependencies(id) {
                    if !assigned.contains_key(dep) && !entries.iter().any(|e| e == dep) {
                        if let Some(dep_path) = browserify_path(&path, request) {
                            assigned.insert(dep.to_string(), dep_path);
                        }
                    }
                }
            }
            assigned.insert(id.to_string(), path);
        }

        let mut used = HashSet::new();
        for module in self.modules.values_mut() {
            let mut path = assigned
                .remove(&module.id)
                .unwrap_or_else(|| default_path(&module.id, &[]));
            if let Some(mapped) = mappings.resolve(&module.module) {
                match paths::normalize(mapped).filter(|p| !p.is_empty()) {
                    Some(mapped) => {
                        debug!("module {} mapped to {mapped}", module.id);
                        path = mapped;
                    }
                    None => warn!("ignoring mapping '{mapped}' for module {}", module.id),
                }
            }
            if !used.insert(path.clone()) {
                path = paths::with_suffix(&path, &file_safe(&module.id));
                used.insert(path.clone());
            }
            module.path = path;
        }
    }

    /// Points every resolved require call at the assigned file.
    fn rewrite_requires(&mut self) {
        let assigned: HashMap<String, String> = self
            .modules
            .values()
            .map(|m| (m.id.clone(), m.path.clone()))
            .collect();
        for module in self.modules.values_mut() {
            let Some(require) = module.require.clone() else {
                continue;
            };
            let targets: HashMap<String, String> = self
                .graph
                .dependencies(&module.id)
                .into_iter()
                .filter_map(|(request, id)| {
                    Some((request.to_string(), paths::relative(&module.path, assigned.get(id)?)))
                })
                .collect();
            let count = rewrite_requires(&mut module.module, &require, |request| {
                targets.get(request).cloned()
            });
            debug!("module {}: rewrote {count} require calls", module.id);
        }
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub fn entries(&self) -> impl Iterator<Item = &BundleModule> {
        self.modules.values().filter(|m| m.is_entry)
    }

    /// Emitted code of one module.
    pub fn code(&self, id: &str) -> Option<Result<String, CodegenError>> {
        self.modules
            .get(id)
            .map(|m| emit_module(&m.module, &self.source_map))
    }

    /// Writes one file per module below `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), UnpackError> {
        for module in self.modules.values() {
            let target = paths::confine(dir, &module.path)?;
            let code = emit_module(&module.module, &self.source_map)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|source| UnpackError::Io {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
            fs::write(&target, code).map_err(|source| UnpackError::Io {
                path: target.display().to_string(),
                source,
            })?;
        }
        info!("Saved {} modules to {}", self.modules.len(), dir.display());
        Ok(())
    }
}

/// Entry modules get fixed names, everything else is named after its id.
fn default_path(id: &str, entries: &[String]) -> String {
    match entries.iter().position(|e| e == id) {
        Some(0) => "index.js".to_string(),
        Some(_) => format!("entry-{}.js", file_safe(&module_stem(id))),
        None => format!("{}.js", module_stem(id)),
    }
}

/// Bundle-relative path of a module id without its `.js` extension:
/// `./src/a.js` → `src/a`, `../node_modules/lib/index.js` →
/// `node_modules/lib/index`, `12` → `12`.
fn module_stem(id: &str) -> String {
    let inside = id
        .split('/')
        .skip_while(|segment| matches!(*segment, "" | "." | ".."))
        .collect::<Vec<_>>()
        .join("/");
    let stem = paths::normalize(&inside)
        .filter(|p| !p.is_empty())
        .map(|p| p.replace([':', '\\'], "_"))
        .unwrap_or_else(|| file_safe(id));
    match stem.strip_suffix(".js") {
        Some(stripped) if !stripped.is_empty() && !stripped.ends_with('/') => stripped.to_string(),
        _ => stem,
    }
}

/// A module id flattened into a single file name segment.
fn file_safe(id: &str) -> String {
    id.trim_start_matches(['.', '/'])
        .replace(['/', '\\', ':', '.'], "_")
}

fn is_relative(request: &str) -> bool {
    request.starts_with("./") || request.starts_with("../")
}

/// Path of a browserify dependency seen from the file at `parent`.
fn browserify_path(parent: &str, request: &str) -> Option<String> {
    if is_relative(request) {
        return paths::join(parent, request)
            .filter(|p| !p.is_empty())
            .map(|p| paths::with_js_extension(&p));
    }
    let package = paths::normalize(request).filter(|p| !p.is_empty())?;
    Some(if package.contains('/') {
        paths::with_js_extension(&format!("node_modules/{package}"))
    } else {
        format!("node_modules/{package}/index.js")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browserify_paths() {
        assert_eq!(browserify_path("index.js", "./lib/a").as_deref(), Some("lib/a.js"));
        assert_eq!(browserify_path("lib/a.js", "../b.js").as_deref(), Some("b.js"));
        assert_eq!(browserify_path("index.js", "react").as_deref(), Some("node_modules/react/index.js"));
        assert_eq!(browserify_path("index.js", "lodash/map").as_deref(), Some("node_modules/lodash/map.js"));
        assert_eq!(browserify_path("index.js", "../../x"), None);
    }

    #[test]
    fn test_default_paths_of_string_ids() {
        let entries = ["./src/index.js".to_string(), "./src/admin.js".to_string()];
        assert_eq!(default_path("./src/index.js", &entries), "index.js");
        assert_eq!(default_path("./src/admin.js", &entries), "entry-src_admin.js");
        assert_eq!(default_path("./src/a.js", &entries), "src/a.js");
        assert_eq!(default_path("../node_modules/lib/index.js", &entries), "node_modules/lib/index.js");
        assert_eq!(default_path("./styles/app.css", &entries), "styles/app.css.js");
        assert_eq!(default_path("7", &entries), "7.js");
    }
}
