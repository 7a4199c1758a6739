//! Wiring computation
//!
//! A resolve pass works on the pool of unresolved, non-stale revisions:
//!
//! 1. fragments pick a host among the pool (highest version, lowest id)
//! 2. revisions with a mandatory requirement that has no candidate at all
//!    are dropped, repeatedly, until nothing changes (greatest fixpoint);
//!    singleton selection runs on what survives
//! 3. wires are chosen per requirement, highest version first with ties
//!    going to the lowest bundle id, skipping candidates whose `uses`
//!    constraints clash with what the requirer already sees; providers are
//!    selected before their requirers, and cycles are re-selected until
//!    stable. A revision that cannot be wired is dropped and the pass
//!    starts over
//!
//! Only the revisions reachable from the requested targets are committed.

use super::wiring::{BundleWiring, ResolutionFailure, ResolveReport, Wire, WireKind};
use crate::manifest::{ExportedPackage, FragmentHost, Requirement};
use crate::revision::{BundleRevision, RevisionId};
use crate::version::Version;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

/// Resolver state: known revisions and the wiring of the resolved ones
#[derive(Debug, Default)]
pub struct Resolver {
    revisions: BTreeMap<RevisionId, Arc<BundleRevision>>,
    removal_pending: BTreeSet<RevisionId>,
    wirings: BTreeMap<RevisionId, BundleWiring>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_revision(&mut self, revision: Arc<BundleRevision>) {
        self.revisions.insert(revision.id(), revision);
    }

    pub fn revision(&self, id: RevisionId) -> Option<&Arc<BundleRevision>> {
        self.revisions.get(&id)
    }

    pub fn contains(&self, id: RevisionId) -> bool {
        self.revisions.contains_key(&id)
    }

    /// Stale revisions keep their wiring but are never chosen for new wires
    pub fn mark_removal_pending(&mut self, id: RevisionId) {
        if self.revisions.contains_key(&id) {
            self.removal_pending.insert(id);
        }
    }

    pub fn is_removal_pending(&self, id: RevisionId) -> bool {
        self.removal_pending.contains(&id)
    }

    pub fn removal_pending(&self) -> Vec<RevisionId> {
        self.removal_pending.iter().copied().collect()
    }

    pub fn is_resolved(&self, id: RevisionId) -> bool {
        self.wirings.contains_key(&id)
    }

    pub fn wiring(&self, id: RevisionId) -> Option<&BundleWiring> {
        self.wirings.get(&id)
    }

    /// Resolved revisions that depend directly on `id`: importers, bundles
    /// requiring it, and fragment/host partners
    pub fn dependents(&self, id: RevisionId) -> BTreeSet<RevisionId> {
        let mut out = BTreeSet::new();
        for (other, wiring) in &self.wirings {
            if *other == id {
                continue;
            }
            let wired = wiring.required.iter().any(|w| w.provider == id);
            let partner = wiring.host == Some(id) || wiring.fragments.contains(&id);
            if wired || partner {
                out.insert(*other);
            }
        }
        out
    }

    /// `roots` plus everything transitively depending on them
    pub fn removal_closure<I>(&self, roots: I) -> BTreeSet<RevisionId>
    where
        I: IntoIterator<Item = RevisionId>,
    {
        let mut closure = BTreeSet::new();
        let mut queue: VecDeque<RevisionId> = roots.into_iter().collect();
        while let Some(id) = queue.pop_front() {
            if closure.insert(id) {
                queue.extend(self.dependents(id));
            }
        }
        closure
    }

    /// Drop the wiring of `id` (and of fragments attached to it). Returns
    /// the revisions that became unresolved.
    pub fn unresolve(&mut self, id: RevisionId) -> Vec<RevisionId> {
        let mut dropped = Vec::new();
        if let Some(wiring) = self.wirings.remove(&id) {
            dropped.push(id);
            for fragment in wiring.fragments {
                if self.wirings.remove(&fragment).is_some() {
                    dropped.push(fragment);
                }
            }
            if let Some(host) = wiring.host {
                if let Some(host_wiring) = self.wirings.get_mut(&host) {
                    host_wiring.fragments.retain(|f| *f != id);
                }
            }
        }
        dropped
    }

    pub fn remove_revision(&mut self, id: RevisionId) {
        self.unresolve(id);
        self.revisions.remove(&id);
        self.removal_pending.remove(&id);
    }

    /// Resolve `targets` (everything unresolved when empty). Already
    /// resolved targets are left untouched.
    pub fn resolve(&mut self, targets: &[RevisionId]) -> ResolveReport {
        let (wirings, mut failures) = {
            let mut pass = Pass::new(self);
            pass.run();
            let closure = pass.closure(targets);
            let wirings = pass.wirings_for(&closure);
            (wirings, pass.failures)
        };

        for target in targets {
            if self.wirings.contains_key(target) || wirings.iter().any(|w| w.revision == *target) {
                continue;
            }
            if failures.contains_key(target) {
                continue;
            }
            let reason = if !self.revisions.contains_key(target) {
                "unknown revision"
            } else if self.removal_pending.contains(target) {
                "revision is pending removal"
            } else {
                "not reachable"
            };
            failures.insert(
                *target,
                ResolutionFailure {
                    revision: *target,
                    requirement: None,
                    reason: reason.to_string(),
                },
            );
        }

        let mut resolved = Vec::with_capacity(wirings.len());
        for wiring in wirings {
            debug!(revision = %wiring.revision, wires = wiring.required.len(), "Revision resolved");
            resolved.push(wiring.revision);
            self.wirings.insert(wiring.revision, wiring);
        }
        resolved.sort();
        for failure in failures.values() {
            debug!(revision = %failure.revision, "{}", failure);
        }
        ResolveReport { resolved, failures }
    }
}

struct Candidate {
    provider: RevisionId,
    version: Version,
}

#[derive(Default, Clone, PartialEq)]
struct Selection {
    wires: Vec<Wire>,
    space: BTreeMap<String, RevisionId>,
}

struct Pass<'a> {
    resolver: &'a Resolver,
    pool: BTreeSet<RevisionId>,
    /// fragment -> host
    hosts: BTreeMap<RevisionId, RevisionId>,
    selections: BTreeMap<RevisionId, Selection>,
    failures: BTreeMap<RevisionId, ResolutionFailure>,
}

impl<'a> Pass<'a> {
    fn new(resolver: &'a Resolver) -> Self {
        let pool = resolver
            .revisions
            .keys()
            .filter(|id| !resolver.wirings.contains_key(id) && !resolver.removal_pending.contains(id))
            .copied()
            .collect();
        Pass {
            resolver,
            pool,
            hosts: BTreeMap::new(),
            selections: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }

    fn revision(&self, id: RevisionId) -> Option<&'a Arc<BundleRevision>> {
        self.resolver.revisions.get(&id)
    }

    fn is_fragment(&self, id: RevisionId) -> bool {
        self.revision(id).map(|r| r.is_fragment()).unwrap_or(false)
    }

    fn fail(&mut self, revision: RevisionId, requirement: Option<Requirement>, reason: impl Into<String>) {
        self.pool.remove(&revision);
        self.hosts.remove(&revision);
        self.failures.entry(revision).or_insert_with(|| ResolutionFailure {
            revision,
            requirement,
            reason: reason.into(),
        });
    }

    fn run(&mut self) {
        'outer: loop {
            self.attach_fragments();
            self.prune();
            self.selections.clear();

            let order: Vec<RevisionId> = self.pool.iter().copied().filter(|id| !self.is_fragment(*id)).collect();
            let mut visited = BTreeSet::new();
            for id in order {
                if let Err((failed, requirement, reason)) = self.select_deep(id, &mut visited) {
                    self.fail(failed, Some(requirement), reason);
                    continue 'outer;
                }
            }

            // members of a cycle were judged against partial spaces
            for _ in 0..=self.selections.len() {
                let mut changed = false;
                let ids: Vec<RevisionId> = self.selections.keys().copied().collect();
                for id in ids {
                    match self.select(id) {
                        Ok(selection) => {
                            if self.selections.get(&id) != Some(&selection) {
                                self.selections.insert(id, selection);
                                changed = true;
                            }
                        }
                        Err((requirement, reason)) => {
                            self.fail(id, Some(requirement), reason);
                            continue 'outer;
                        }
                    }
                }
                if !changed {
                    break;
                }
            }
            break;
        }
    }

    /// Select every pool provider `id` could wire to before `id` itself, so
    /// uses checks see the providers' complete package spaces
    fn select_deep(
        &mut self,
        id: RevisionId,
        visited: &mut BTreeSet<RevisionId>,
    ) -> std::result::Result<(), (RevisionId, Requirement, String)> {
        if !visited.insert(id) {
            return Ok(());
        }
        let mut providers = BTreeSet::new();
        for requirement in self.effective_requirements(id) {
            for candidate in self.candidates(id, &requirement) {
                if candidate.provider != id && self.pool.contains(&candidate.provider) {
                    providers.insert(candidate.provider);
                }
            }
        }
        for provider in providers {
            self.select_deep(provider, visited)?;
        }
        let selection = self.select(id).map_err(|(requirement, reason)| (id, requirement, reason))?;
        self.selections.insert(id, selection);
        Ok(())
    }

    fn attach_fragments(&mut self) {
        self.hosts.clear();
        let fragments: Vec<RevisionId> = self.pool.iter().copied().filter(|id| self.is_fragment(*id)).collect();
        for fragment in fragments {
            let host_req = match self.revision(fragment).and_then(|r| r.description().fragment_host.clone()) {
                Some(h) => h,
                None => continue,
            };

            let best = self
                .pool
                .iter()
                .filter_map(|id| self.revision(*id))
                .filter(|rev| host_matches(&host_req, rev))
                .max_by(|a, b| a.version().cmp(b.version()).then(b.id().cmp(&a.id())))
                .map(|rev| rev.id());

            match best {
                Some(host) => {
                    trace!(fragment = %fragment, host = %host, "Fragment attached");
                    self.hosts.insert(fragment, host);
                }
                None => {
                    let resolved_host = self
                        .resolver
                        .wirings
                        .keys()
                        .filter_map(|id| self.revision(*id))
                        .any(|rev| host_matches(&host_req, rev));
                    let reason = if resolved_host {
                        "host is already resolved; refresh it to attach the fragment"
                    } else {
                        "missing fragment host"
                    };
                    self.fail(fragment, Some(Requirement::Host(host_req)), reason);
                }
            }
        }
    }

    fn attached(&self, host: RevisionId) -> Vec<RevisionId> {
        self.hosts
            .iter()
            .filter(|(_, h)| **h == host)
            .map(|(f, _)| *f)
            .collect()
    }

    /// Requirements of a host merged with those of its attached fragments
    fn effective_requirements(&self, id: RevisionId) -> Vec<Requirement> {
        let rev = match self.revision(id) {
            Some(r) => r,
            None => return Vec::new(),
        };
        let mut reqs: Vec<Requirement> = rev
            .description()
            .requirements()
            .into_iter()
            .filter(|r| !matches!(r, Requirement::Host(_)))
            .collect();
        let mut imported: BTreeSet<String> = rev.description().imports.iter().map(|i| i.name.clone()).collect();
        for fragment in self.attached(id) {
            if let Some(frag) = self.revision(fragment) {
                for req in fragment_requirements(frag) {
                    if let Requirement::Package(imp) = &req {
                        if !imported.insert(imp.name.clone()) {
                            continue;
                        }
                    }
                    reqs.push(req);
                }
            }
        }
        // packages first so require-bundle sees the import shadowing
        reqs.sort_by_key(|r| !matches!(r, Requirement::Package(_)));
        reqs
    }

    fn effective_exports(&self, id: RevisionId) -> Vec<ExportedPackage> {
        if let Some(wiring) = self.resolver.wirings.get(&id) {
            return wiring.exports.clone();
        }
        let mut exports = self.revision(id).map(|r| r.exports().to_vec()).unwrap_or_default();
        for fragment in self.attached(id) {
            if let Some(frag) = self.revision(fragment) {
                exports.extend(frag.exports().iter().cloned());
            }
        }
        exports
    }

    fn is_provider(&self, id: RevisionId) -> bool {
        if self.is_fragment(id) {
            return false;
        }
        self.pool.contains(&id)
            || (self.resolver.wirings.contains_key(&id) && !self.resolver.removal_pending.contains(&id))
    }

    fn candidates(&self, requirer: RevisionId, requirement: &Requirement) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (id, rev) in &self.resolver.revisions {
            if !self.is_provider(*id) {
                continue;
            }
            match requirement {
                Requirement::Package(import) => {
                    for export in self.effective_exports(*id) {
                        if import.matches(&export, rev.symbolic_name(), rev.version()) {
                            out.push(Candidate {
                                provider: *id,
                                version: export.version.clone(),
                            });
                        }
                    }
                }
                Requirement::Bundle(required) => {
                    if *id != requirer
                        && rev.symbolic_name() == Some(required.symbolic_name.as_str())
                        && required.range.includes(rev.version())
                    {
                        out.push(Candidate {
                            provider: *id,
                            version: rev.version().clone(),
                        });
                    }
                }
                Requirement::Host(_) => {}
            }
        }
        out.sort_by(|a, b| b.version.cmp(&a.version).then(a.provider.cmp(&b.provider)));
        out
    }

    fn prune(&mut self) {
        loop {
            self.prune_missing();
            if !self.select_singletons() {
                break;
            }
        }
    }

    /// Drop revisions with a mandatory requirement nobody can satisfy until
    /// nothing changes
    fn prune_missing(&mut self) {
        loop {
            let mut dropped: Vec<(RevisionId, Requirement, &'static str)> = Vec::new();

            for (fragment, host) in &self.hosts {
                if !self.pool.contains(host) {
                    continue;
                }
                if let Some(frag) = self.revision(*fragment) {
                    for req in fragment_requirements(frag) {
                        if !req.is_optional() && self.candidates(*host, &req).is_empty() {
                            dropped.push((*fragment, req, "missing requirement"));
                            break;
                        }
                    }
                }
            }

            for id in self.pool.iter().filter(|id| !self.is_fragment(**id)) {
                if dropped.iter().any(|(d, _, _)| d == id) {
                    continue;
                }
                for req in self.effective_requirements(*id) {
                    if !req.is_optional() && self.candidates(*id, &req).is_empty() {
                        dropped.push((*id, req, "missing requirement"));
                        break;
                    }
                }
            }

            let orphans: Vec<(RevisionId, RevisionId)> = self
                .hosts
                .iter()
                .filter(|(_, host)| !self.pool.contains(host))
                .map(|(f, h)| (*f, *h))
                .collect();

            if dropped.is_empty() && orphans.is_empty() {
                break;
            }
            for (id, req, reason) in dropped {
                self.fail(id, Some(req), reason);
            }
            for (fragment, _) in orphans {
                let req = self
                    .revision(fragment)
                    .and_then(|r| r.description().fragment_host.clone())
                    .map(Requirement::Host);
                self.fail(fragment, req, "fragment host failed to resolve");
            }
        }
        // hosts dropped in the last round leave orphans behind
        let orphans: Vec<RevisionId> = self
            .hosts
            .iter()
            .filter(|(_, host)| !self.pool.contains(host))
            .map(|(f, _)| *f)
            .collect();
        for fragment in orphans {
            self.fail(fragment, None, "fragment host failed to resolve");
        }
    }

    /// Keep one singleton per symbolic name. Returns whether anything was
    /// dropped.
    fn select_singletons(&mut self) -> bool {
        let mut by_name: BTreeMap<String, Vec<RevisionId>> = BTreeMap::new();
        for id in &self.pool {
            if let Some(rev) = self.revision(*id) {
                if rev.description().singleton {
                    if let Some(name) = rev.symbolic_name() {
                        by_name.entry(name.to_string()).or_default().push(*id);
                    }
                }
            }
        }

        let mut losers: Vec<(RevisionId, String)> = Vec::new();
        for (name, mut ids) in by_name {
            let resolved = self.resolver.wirings.keys().find(|rid| {
                self.revision(**rid)
                    .map(|r| r.description().singleton && r.symbolic_name() == Some(name.as_str()))
                    .unwrap_or(false)
            });
            if let Some(resolved) = resolved {
                for id in ids {
                    if id.bundle != resolved.bundle {
                        losers.push((id, format!("singleton '{}' already resolved as {}", name, resolved)));
                    }
                }
                continue;
            }
            ids.sort_by(|a, b| {
                let va = self.revision(*a).map(|r| r.version().clone()).unwrap_or_default();
                let vb = self.revision(*b).map(|r| r.version().clone()).unwrap_or_default();
                vb.cmp(&va).then(a.cmp(b))
            });
            let winner = ids[0];
            for id in ids.into_iter().skip(1) {
                losers.push((id, format!("singleton '{}' selected {} instead", name, winner)));
            }
        }

        let changed = !losers.is_empty();
        for (id, reason) in losers {
            self.fail(id, None, reason);
        }
        changed
    }

    /// Package space a provider exposes to uses checks
    fn space_of(&self, id: RevisionId) -> BTreeMap<String, RevisionId> {
        if let Some(wiring) = self.resolver.wirings.get(&id) {
            return wiring.package_space.clone();
        }
        if let Some(selection) = self.selections.get(&id) {
            return selection.space.clone();
        }
        self.effective_exports(id).into_iter().map(|e| (e.name, id)).collect()
    }

    /// Package bindings an importer takes on by wiring `package` to
    /// `provider`, following `uses` transitively
    fn implied(&self, provider: RevisionId, package: &str) -> BTreeMap<String, RevisionId> {
        let mut out = BTreeMap::new();
        out.insert(package.to_string(), provider);
        let mut queue = VecDeque::from([(provider, package.to_string())]);
        while let Some((prov, pkg)) = queue.pop_front() {
            let uses: Vec<String> = self
                .effective_exports(prov)
                .into_iter()
                .find(|e| e.name == pkg)
                .map(|e| e.uses)
                .unwrap_or_default();
            if uses.is_empty() {
                continue;
            }
            let space = self.space_of(prov);
            for used in uses {
                if let Some(p) = space.get(&used) {
                    if !out.contains_key(&used) {
                        out.insert(used.clone(), *p);
                        queue.push_back((*p, used));
                    }
                }
            }
        }
        out
    }

    /// Packages visible through Require-Bundle on `provider`, reexports
    /// included
    fn bundle_packages(&self, provider: RevisionId, visited: &mut BTreeSet<RevisionId>) -> BTreeMap<String, RevisionId> {
        let mut out = BTreeMap::new();
        if !visited.insert(provider) {
            return out;
        }
        for export in self.effective_exports(provider) {
            out.entry(export.name).or_insert(provider);
        }
        let wires: Vec<Wire> = match self.resolver.wirings.get(&provider) {
            Some(w) => w.required.clone(),
            None => self.selections.get(&provider).map(|s| s.wires.clone()).unwrap_or_default(),
        };
        for wire in wires {
            if wire.kind == (WireKind::Bundle { reexport: true }) {
                for (pkg, p) in self.bundle_packages(wire.provider, visited) {
                    out.entry(pkg).or_insert(p);
                }
            }
        }
        out
    }

    fn select(&self, id: RevisionId) -> std::result::Result<Selection, (Requirement, String)> {
        let requirements = self.effective_requirements(id);
        let imported: BTreeSet<String> = requirements
            .iter()
            .filter_map(|r| match r {
                Requirement::Package(p) => Some(p.name.clone()),
                _ => None,
            })
            .collect();

        let mut selection = Selection::default();
        let mut constraints: BTreeMap<String, RevisionId> = BTreeMap::new();
        for export in self.effective_exports(id) {
            if !imported.contains(&export.name) {
                selection.space.insert(export.name, id);
            }
        }

        for requirement in &requirements {
            let candidates = self.candidates(id, requirement);
            let mut chosen: Option<(RevisionId, BTreeMap<String, RevisionId>)> = None;

            match requirement {
                Requirement::Package(import) => {
                    for candidate in &candidates {
                        if candidate.provider == id {
                            chosen = Some((id, BTreeMap::new()));
                            break;
                        }
                        let implied = self.implied(candidate.provider, &import.name);
                        if consistent(&implied, &selection.space, &constraints) {
                            chosen = Some((candidate.provider, implied));
                            break;
                        }
                        trace!(requirer = %id, provider = %candidate.provider, package = %import.name, "Candidate violates uses constraint");
                    }
                    if let Some((provider, implied)) = chosen {
                        selection.space.insert(import.name.clone(), provider);
                        if provider != id {
                            constraints.extend(implied);
                            selection.wires.push(Wire {
                                requirer: id,
                                provider,
                                requirement: requirement.clone(),
                                kind: WireKind::Package(import.name.clone()),
                            });
                        }
                        continue;
                    }
                }
                Requirement::Bundle(required) => {
                    for candidate in &candidates {
                        let visible: BTreeMap<String, RevisionId> = self
                            .bundle_packages(candidate.provider, &mut BTreeSet::new())
                            .into_iter()
                            .filter(|(pkg, _)| !imported.contains(pkg))
                            .collect();
                        let clash = visible
                            .iter()
                            .any(|(pkg, p)| constraints.get(pkg).map(|c| c != p).unwrap_or(false));
                        if !clash {
                            chosen = Some((candidate.provider, visible));
                            break;
                        }
                    }
                    if let Some((provider, visible)) = chosen {
                        for (pkg, p) in visible {
                            selection.space.entry(pkg).or_insert(p);
                        }
                        selection.wires.push(Wire {
                            requirer: id,
                            provider,
                            requirement: requirement.clone(),
                            kind: WireKind::Bundle {
                                reexport: required.reexport,
                            },
                        });
                        continue;
                    }
                }
                Requirement::Host(_) => continue,
            }

            if requirement.is_optional() {
                continue;
            }
            let reason = if candidates.is_empty() {
                "missing requirement"
            } else {
                "uses constraint violation"
            };
            return Err((requirement.clone(), reason.to_string()));
        }
        Ok(selection)
    }

    /// Pool members reachable from `targets` through chosen wires and
    /// fragment attachment
    fn closure(&self, targets: &[RevisionId]) -> BTreeSet<RevisionId> {
        if targets.is_empty() {
            return self.pool.clone();
        }
        let mut closure = BTreeSet::new();
        let mut queue: VecDeque<RevisionId> = VecDeque::new();
        for target in targets {
            if !self.pool.contains(target) {
                continue;
            }
            queue.push_back(*target);
            if let Some(host) = self.hosts.get(target) {
                queue.push_back(*host);
            }
        }
        while let Some(id) = queue.pop_front() {
            if !self.pool.contains(&id) || !closure.insert(id) {
                continue;
            }
            if let Some(selection) = self.selections.get(&id) {
                queue.extend(selection.wires.iter().map(|w| w.provider));
            }
            queue.extend(self.attached(id));
        }
        closure
    }

    fn wirings_for(&self, closure: &BTreeSet<RevisionId>) -> Vec<BundleWiring> {
        let mut out = Vec::new();
        for id in closure {
            if let Some(host) = self.hosts.get(id) {
                let selection = match self.selections.get(host) {
                    Some(s) => s,
                    None => continue,
                };
                let requirement = match self.revision(*id).and_then(|r| r.description().fragment_host.clone()) {
                    Some(h) => Requirement::Host(h),
                    None => continue,
                };
                out.push(BundleWiring {
                    revision: *id,
                    required: vec![Wire {
                        requirer: *id,
                        provider: *host,
                        requirement,
                        kind: WireKind::Host,
                    }],
                    fragments: Vec::new(),
                    host: Some(*host),
                    package_space: selection.space.clone(),
                    exports: self.revision(*id).map(|r| r.exports().to_vec()).unwrap_or_default(),
                });
            } else if let Some(selection) = self.selections.get(id) {
                out.push(BundleWiring {
                    revision: *id,
                    required: selection.wires.clone(),
                    fragments: self.attached(*id),
                    host: None,
                    package_space: selection.space.clone(),
                    exports: self.effective_exports(*id),
                });
            }
        }
        out
    }
}

fn host_matches(host: &FragmentHost, rev: &BundleRevision) -> bool {
    !rev.is_fragment() && rev.symbolic_name() == Some(host.symbolic_name.as_str()) && host.range.includes(rev.version())
}

fn fragment_requirements(fragment: &BundleRevision) -> Vec<Requirement> {
    fragment
        .description()
        .requirements()
        .into_iter()
        .filter(|r| !matches!(r, Requirement::Host(_)))
        .collect()
}

fn consistent(
    implied: &BTreeMap<String, RevisionId>,
    space: &BTreeMap<String, RevisionId>,
    constraints: &BTreeMap<String, RevisionId>,
) -> bool {
    implied.iter().all(|(pkg, provider)| {
        space.get(pkg).map(|p| p == provider).unwrap_or(true)
            && constraints.get(pkg).map(|p| p == provider).unwrap_or(true)
    })
}
