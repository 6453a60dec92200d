//! Dependency resolution and load ordering.
//!
//! The resolver works on validated manifests and produces:
//!
//! - a total load order over every plugin that can be loaded, where each
//!   plugin comes after all plugins it depends on, and
//! - one [`Exclusion`] per plugin that cannot be loaded.
//!
//! Resolution runs in three phases:
//!
//! 1. A plugin naming a dependency that no manifest provides is excluded with
//!    [`ResolutionError::MissingDependency`].
//! 2. Depth-first search with three-colour marking finds cycles; every member
//!    of a cycle is excluded with [`ResolutionError::CyclicDependency`] and
//!    the search is repeated on the remainder.
//! 3. The acyclic remainder is ordered with Kahn's algorithm. Among plugins
//!    that are ready at the same time, the smallest `(pluginName, id)` goes
//!    first.
//!
//! After phases 1 and 2, exclusions are propagated to dependents. A
//! dependent inherits the root cause unchanged and records the dependency
//! it reached it through in [`Exclusion::via`].
//!
//! Nodes are plugins, not names: two plugins may share a name (the loader
//! rejects the later one). A dependency name is satisfied while at least
//! one plugin with that name is still loadable.

use crate::error::ResolutionError;
use crate::manifest::PluginManifest;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// A plugin left out of the load order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    /// Caller-supplied identifier of the plugin.
    pub id: usize,

    /// Name of the excluded plugin.
    pub plugin_name: String,

    /// Root cause. Shared verbatim by every plugin excluded because of it.
    pub cause: ResolutionError,

    /// Dependency through which an inherited cause arrived; `None` at the root.
    pub via: Option<String>,
}

impl Exclusion {
    /// Whether this plugin is where the cause originated.
    pub fn is_root(&self) -> bool {
        self.via.is_none()
    }
}

/// Output of dependency resolution.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Identifiers of loadable plugins, in load order.
    pub order: Vec<usize>,

    /// Excluded plugins, in input order.
    pub exclusions: Vec<Exclusion>,
}

impl Resolution {
    /// Find the exclusion recorded for a plugin.
    pub fn exclusion_for(&self, id: usize) -> Option<&Exclusion> {
        self.exclusions.iter().find(|e| e.id == id)
    }

    /// Exclusions that originate a cause, one per root cause and member.
    pub fn root_causes(&self) -> impl Iterator<Item = &Exclusion> {
        self.exclusions.iter().filter(|e| e.is_root())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

struct Node<'a> {
    id: usize,
    manifest: &'a PluginManifest,
}

/// Builds a load order over a set of validated manifests.
pub struct DependencyResolver<'a> {
    nodes: Vec<Node<'a>>,
    providers: HashMap<&'a str, Vec<usize>>,
    excluded: Vec<Option<Exclusion>>,
}

impl<'a> DependencyResolver<'a> {
    /// Create a resolver over `(id, manifest)` pairs given in discovery order.
    pub fn new<I>(candidates: I) -> Self
    where
        I: IntoIterator<Item = (usize, &'a PluginManifest)>,
    {
        let nodes: Vec<Node<'a>> = candidates
            .into_iter()
            .map(|(id, manifest)| Node { id, manifest })
            .collect();

        let mut providers: HashMap<&'a str, Vec<usize>> = HashMap::new();
        for (pos, node) in nodes.iter().enumerate() {
            providers
                .entry(node.manifest.plugin_name())
                .or_default()
                .push(pos);
        }

        let excluded = vec![None; nodes.len()];
        Self {
            nodes,
            providers,
            excluded,
        }
    }

    /// Run resolution.
    pub fn resolve(mut self) -> Resolution {
        self.exclude_missing();
        loop {
            self.propagate();
            match self.find_cycle() {
                Some(cycle) => self.exclude_cycle(&cycle),
                None => break,
            }
        }

        let order = self.topological_order();
        debug!("Resolved load order over {} plugins", order.len());

        Resolution {
            order,
            exclusions: self.excluded.into_iter().flatten().collect(),
        }
    }

    fn is_live(&self, pos: usize) -> bool {
        self.excluded[pos].is_none()
    }

    fn name(&self, pos: usize) -> &'a str {
        self.nodes[pos].manifest.plugin_name()
    }

    fn key(&self, pos: usize) -> (&'a str, usize) {
        (self.name(pos), self.nodes[pos].id)
    }

    fn exclude(&mut self, pos: usize, cause: ResolutionError, via: Option<String>) {
        self.excluded[pos] = Some(Exclusion {
            id: self.nodes[pos].id,
            plugin_name: self.name(pos).to_string(),
            cause,
            via,
        });
    }

    fn exclude_missing(&mut self) {
        for pos in 0..self.nodes.len() {
            let manifest = self.nodes[pos].manifest;
            let missing = manifest
                .dependencies()
                .iter()
                .find(|dep| !self.providers.contains_key(dep.as_str()));

            if let Some(dependency) = missing {
                warn!(
                    "Plugin {} depends on plugin {} which does not exist",
                    manifest.plugin_name(),
                    dependency
                );
                let cause = ResolutionError::MissingDependency {
                    plugin: manifest.plugin_name().to_string(),
                    dependency: dependency.clone(),
                };
                self.exclude(pos, cause, None);
            }
        }
    }

    fn live_providers<'s>(&'s self, name: &str) -> impl Iterator<Item = usize> + 's {
        self.providers
            .get(name)
            .into_iter()
            .flatten()
            .copied()
            .filter(move |&pos| self.is_live(pos))
    }

    /// Exclude every live plugin with a dependency name whose providers are all excluded.
    fn propagate(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            for pos in 0..self.nodes.len() {
                if !self.is_live(pos) {
                    continue;
                }

                let manifest = self.nodes[pos].manifest;
                let inherited = manifest.dependencies().iter().find_map(|dep| {
                    if self.live_providers(dep).next().is_some() {
                        return None;
                    }
                    let first = *self.providers.get(dep.as_str())?.first()?;
                    let cause = self.excluded[first].as_ref()?.cause.clone();
                    Some((cause, dep.clone()))
                });

                if let Some((cause, via)) = inherited {
                    debug!(
                        "Plugin {} excluded through dependency {}: {}",
                        manifest.plugin_name(),
                        via,
                        cause
                    );
                    self.exclude(pos, cause, Some(via));
                    changed = true;
                }
            }
        }
    }

    /// Live providers of every dependency, deduplicated, in tie-break order.
    fn edges(&self, pos: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self.nodes[pos]
            .manifest
            .dependencies()
            .iter()
            .flat_map(|dep| self.live_providers(dep))
            .collect();
        out.sort_by_key(|&p| self.key(p));
        out.dedup();
        out
    }

    fn find_cycle(&self) -> Option<Vec<usize>> {
        let mut roots: Vec<usize> = (0..self.nodes.len()).filter(|&p| self.is_live(p)).collect();
        roots.sort_by_key(|&p| self.key(p));

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        for pos in roots {
            if marks[pos] == Mark::Unvisited {
                if let Some(cycle) = self.visit(pos, &mut marks) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Three-colour DFS from `start` on an explicit stack.
    ///
    /// The stack holds the current path, so a back edge yields the cycle.
    fn visit(&self, start: usize, marks: &mut [Mark]) -> Option<Vec<usize>> {
        // (node, its edges, next edge to follow)
        let mut stack: Vec<(usize, Vec<usize>, usize)> = vec![(start, self.edges(start), 0)];
        marks[start] = Mark::InProgress;

        while let Some(frame) = stack.last_mut() {
            let pos = frame.0;
            let next = frame.1.get(frame.2).copied();
            frame.2 += 1;

            match next {
                Some(next) => match marks[next] {
                    Mark::InProgress => {
                        let from = stack.iter().position(|frame| frame.0 == next)?;
                        return Some(stack[from..].iter().map(|frame| frame.0).collect());
                    }
                    Mark::Unvisited => {
                        marks[next] = Mark::InProgress;
                        stack.push((next, self.edges(next), 0));
                    }
                    Mark::Done => {}
                },
                None => {
                    marks[pos] = Mark::Done;
                    stack.pop();
                }
            }
        }
        None
    }

    fn exclude_cycle(&mut self, cycle: &[usize]) {
        let names: Vec<String> = cycle.iter().map(|&p| self.name(p).to_string()).collect();
        warn!("Detected cyclic dependency: {}", names.join(" -> "));

        for &pos in cycle {
            let cause = ResolutionError::CyclicDependency {
                cycle: names.clone(),
            };
            self.exclude(pos, cause, None);
        }
    }

    fn topological_order(&self) -> Vec<usize> {
        let live: Vec<usize> = (0..self.nodes.len()).filter(|&p| self.is_live(p)).collect();

        let mut pending = vec![0usize; self.nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for &pos in &live {
            for dep in self.edges(pos) {
                pending[pos] += 1;
                dependents[dep].push(pos);
            }
        }

        let mut ready: BTreeSet<(&'a str, usize, usize)> = live
            .iter()
            .filter(|&&p| pending[p] == 0)
            .map(|&p| (self.name(p), self.nodes[p].id, p))
            .collect();

        let mut order = Vec::with_capacity(live.len());
        while let Some((_, id, pos)) = ready.pop_first() {
            order.push(id);
            for &dependent in &dependents[pos] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert((self.name(dependent), self.nodes[dependent].id, dependent));
                }
            }
        }
        order
    }
}

/// Resolve a load order over `(id, manifest)` pairs given in discovery order.
pub fn resolve<'a, I>(candidates: I) -> Resolution
where
    I: IntoIterator<Item = (usize, &'a PluginManifest)>,
{
    DependencyResolver::new(candidates).resolve()
}
