/**
 * lifecycle.rs
 * Bundle and framework state transitions
 *
 * Every transition runs while holding the bundle's transition claim
 * (`BundleData::begin_transition`). The inner bundle lock is only held for
 * short field updates; activators, listeners and the resolver never run
 * under it.
 */

use super::activator::guarded;
use super::bundle::{BundleData, BundleState, StartOptions, StopOptions, TransitionGuard};
use super::bundle_context::BundleContext;
use super::context::FrameworkContext;
use super::{lock, read_lock, write_lock};
use crate::config::StorageClean;
use crate::errors::{BoxError, BundleErrorKind, FrameworkError, Result};
use crate::events::{BundleEventKind, FrameworkEventKind};
use crate::manifest::BundleDescription;
use crate::revision::{BundleRevision, RevisionId, SYSTEM_BUNDLE_ID};
use std::collections::BTreeSet;
use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

fn uninstalled(data: &BundleData) -> FrameworkError {
    FrameworkError::illegal_state(format!("Bundle {} has been uninstalled", data.id))
}

impl FrameworkContext {
    // ---- bundle operations ----

    pub(crate) fn start_bundle(&self, data: &Arc<BundleData>, options: StartOptions) -> Result<()> {
        if data.id == SYSTEM_BUNDLE_ID {
            return self.start_framework();
        }
        let _guard = data.begin_transition()?;
        let state = data.state();
        if state == BundleState::Uninstalled {
            return Err(uninstalled(data));
        }
        if data.current_revision().is_fragment() {
            return Err(FrameworkError::bundle(
                BundleErrorKind::InvalidOperation,
                format!("Bundle {} is a fragment and cannot be started", data.id),
            ));
        }
        if !options.transient {
            if let Some(archive) = &data.archive {
                archive.set_persistent_start(true)?;
            }
        }
        if state == BundleState::Active {
            return Ok(());
        }
        if !self.system.state().is_active() {
            debug!(bundle_id = data.id, "Framework not running, start deferred");
            return Ok(());
        }
        self.ensure_resolved(data)?;
        self.do_start(data)
    }

    pub(crate) fn stop_bundle(&self, data: &Arc<BundleData>, options: StopOptions) -> Result<()> {
        if data.id == SYSTEM_BUNDLE_ID {
            return self.stop_framework();
        }
        let _guard = data.begin_transition()?;
        if data.state() == BundleState::Uninstalled {
            return Err(uninstalled(data));
        }
        if data.current_revision().is_fragment() {
            return Err(FrameworkError::bundle(
                BundleErrorKind::InvalidOperation,
                format!("Bundle {} is a fragment and cannot be stopped", data.id),
            ));
        }
        if !options.transient {
            if let Some(archive) = &data.archive {
                archive.set_persistent_start(false)?;
            }
        }
        if data.state() != BundleState::Active {
            return Ok(());
        }
        self.do_stop(data)
    }

    pub(crate) fn update_bundle<R: Read>(&self, data: &Arc<BundleData>, content: R) -> Result<()> {
        if data.id == SYSTEM_BUNDLE_ID {
            return Err(FrameworkError::bundle(
                BundleErrorKind::Unsupported,
                "The system bundle cannot be updated",
            ));
        }
        let _guard = data.begin_transition()?;
        if data.state() == BundleState::Uninstalled {
            return Err(uninstalled(data));
        }
        let archive = data
            .archive
            .as_ref()
            .ok_or_else(|| FrameworkError::Storage(format!("Bundle {} has no archive", data.id)))?;

        // validate the new content before touching the running bundle
        let staged = self.storage.stage(content).map_err(FrameworkError::into_invalid_bundle)?;
        let description = BundleDescription::parse(staged.headers()).map_err(FrameworkError::into_invalid_bundle)?;
        self.check_duplicate(&description, Some(data.id))?;

        let was_active = data.state() == BundleState::Active;
        if was_active {
            if let Err(e) = self.do_stop(data) {
                warn!(bundle_id = data.id, error = %e, "Stop before update failed");
            }
        }

        let revision = match self
            .storage
            .update(archive, staged, description.symbolic_name.clone(), description.version.to_string())
            .and_then(|stored| BundleRevision::from_content(data.id, stored).map_err(FrameworkError::into_invalid_bundle))
        {
            Ok(r) => Arc::new(r),
            Err(e) => {
                warn!(bundle_id = data.id, error = %e, "Storing updated content failed");
                if was_active {
                    self.restart_after_update(data);
                }
                return Err(e);
            }
        };
        let old = data.current_revision();

        let keep_old = {
            let mut resolver = lock(&self.resolver);
            resolver.add_revision(Arc::clone(&revision));
            let keep = resolver.dependents(old.id()).iter().any(|d| d.bundle != data.id);
            if keep {
                resolver.mark_removal_pending(old.id());
            } else {
                resolver.remove_revision(old.id());
            }
            keep
        };

        let was_resolved = {
            let mut inner = data.inner();
            if keep_old {
                inner.stale.push(Arc::clone(&old));
            }
            inner.current = Arc::clone(&revision);
            inner.last_modified = archive.meta().last_modified;
            let was_resolved = inner.state.is_resolved();
            inner.state = BundleState::Installed;
            was_resolved
        };
        if !keep_old {
            let pending: Vec<u32> = data.inner().stale.iter().map(|r| r.id().number).collect();
            if let Err(e) = self.storage.purge_stale_revisions(archive, &pending) {
                warn!(bundle_id = data.id, error = %e, "Failed to purge replaced revision");
            }
        }

        info!(bundle_id = data.id, revision = %revision.id(), "Bundle updated");
        if was_resolved {
            self.fire_bundle(BundleEventKind::Unresolved, data);
        }
        self.fire_bundle(BundleEventKind::Updated, data);

        if was_active {
            self.restart_after_update(data);
        }
        Ok(())
    }

    /// Bring a bundle stopped for an update back to ACTIVE; failures are
    /// reported as framework events
    fn restart_after_update(&self, data: &Arc<BundleData>) {
        if let Err(e) = self.ensure_resolved(data).and_then(|_| self.do_start(data)) {
            warn!(bundle_id = data.id, error = %e, "Restart after update failed");
            if e.bundle_error_kind() != Some(BundleErrorKind::ActivatorError) {
                self.fire_framework(FrameworkEventKind::Error, data, Some(e.to_string()));
            }
        }
    }

    pub(crate) fn uninstall_bundle(&self, data: &Arc<BundleData>) -> Result<()> {
        if data.id == SYSTEM_BUNDLE_ID {
            return Err(FrameworkError::bundle(
                BundleErrorKind::InvalidOperation,
                "The system bundle cannot be uninstalled",
            ));
        }
        let _guard = data.begin_transition()?;
        if data.state() == BundleState::Uninstalled {
            return Err(uninstalled(data));
        }
        if data.state() == BundleState::Active {
            if let Err(e) = self.do_stop(data) {
                warn!(bundle_id = data.id, error = %e, "Stop before uninstall failed");
            }
        }

        let revisions = data.inner().revision_ids();
        let pending = {
            let mut resolver = lock(&self.resolver);
            let mut pending = false;
            for id in revisions {
                if resolver.dependents(id).iter().any(|d| d.bundle != data.id) {
                    resolver.mark_removal_pending(id);
                    pending = true;
                } else {
                    resolver.remove_revision(id);
                }
            }
            pending
        };

        write_lock(&self.bundles).remove(&data.id);
        if pending {
            debug!(bundle_id = data.id, "Uninstalled bundle kept until refresh");
            lock(&self.zombies).insert(data.id, Arc::clone(data));
        } else if let Some(archive) = &data.archive {
            self.discard_archive(archive);
        }

        let was_resolved = {
            let mut inner = data.inner();
            let was_resolved = inner.state.is_resolved();
            inner.state = BundleState::Uninstalled;
            was_resolved
        };
        info!(bundle_id = data.id, location = %data.location, "Bundle uninstalled");
        if was_resolved && !pending {
            self.fire_bundle(BundleEventKind::Unresolved, data);
        }
        self.fire_bundle(BundleEventKind::Uninstalled, data);
        Ok(())
    }

    // ---- refresh ----

    /// Synchronous refresh of `targets` (bundles with pending removals when
    /// `None`) and everything depending on them
    pub(crate) fn refresh(&self, targets: Option<&[Arc<BundleData>]>) -> Result<()> {
        let _refreshing = lock(&self.refresh_lock);

        let explicit: Vec<Arc<BundleData>> = match targets {
            Some(list) => list.to_vec(),
            None => {
                let owners: BTreeSet<u64> = lock(&self.resolver)
                    .removal_pending()
                    .iter()
                    .map(|r| r.bundle)
                    .collect();
                owners.into_iter().filter_map(|id| self.bundle_data(id)).collect()
            }
        };
        let roots: Vec<RevisionId> = explicit.iter().flat_map(|d| d.inner().revision_ids()).collect();
        let closure = lock(&self.resolver).removal_closure(roots);

        let mut ids: BTreeSet<u64> = closure.iter().map(|r| r.bundle).collect();
        ids.extend(explicit.iter().map(|d| d.id));
        ids.remove(&SYSTEM_BUNDLE_ID);
        let affected: Vec<Arc<BundleData>> = ids.into_iter().filter_map(|id| self.bundle_data(id)).collect();
        debug!(bundles = affected.len(), "Refreshing bundles");

        let guards: Vec<TransitionGuard> = affected
            .iter()
            .map(|d| d.begin_transition())
            .collect::<Result<Vec<_>>>()?;

        let mut restart = Vec::new();
        for data in affected.iter().rev() {
            if data.state() == BundleState::Active {
                restart.push(Arc::clone(data));
                if let Err(e) = self.do_stop(data) {
                    warn!(bundle_id = data.id, error = %e, "Stop during refresh failed");
                }
            }
        }
        restart.reverse();

        {
            let mut resolver = lock(&self.resolver);
            for revision in &closure {
                resolver.unresolve(*revision);
            }
            for data in &affected {
                let mut inner = data.inner();
                for stale in inner.stale.drain(..) {
                    resolver.remove_revision(stale.id());
                }
                if inner.state == BundleState::Uninstalled {
                    resolver.remove_revision(inner.current.id());
                }
            }
        }

        let mut unresolved = Vec::new();
        for data in &affected {
            if data.state() == BundleState::Uninstalled {
                lock(&self.zombies).remove(&data.id);
                if let Some(archive) = &data.archive {
                    self.discard_archive(archive);
                }
                continue;
            }
            if let Some(archive) = &data.archive {
                if let Err(e) = self.storage.purge_stale_revisions(archive, &[]) {
                    warn!(bundle_id = data.id, error = %e, "Failed to purge stale revisions");
                }
            }
            let was_resolved = {
                let mut inner = data.inner();
                let was_resolved = inner.state.is_resolved();
                inner.state = BundleState::Installed;
                was_resolved
            };
            if was_resolved {
                self.fire_bundle(BundleEventKind::Unresolved, data);
            }
            unresolved.push(Arc::clone(data));
        }

        if self.system.state().is_active() && !unresolved.is_empty() {
            self.resolve(Some(&unresolved));
        }
        for data in &restart {
            if let Err(e) = self.ensure_resolved(data).and_then(|_| self.do_start(data)) {
                warn!(bundle_id = data.id, error = %e, "Restart after refresh failed");
                if e.bundle_error_kind() != Some(BundleErrorKind::ActivatorError) {
                    self.fire_framework(FrameworkEventKind::Error, data, Some(e.to_string()));
                }
            }
        }

        drop(guards);
        info!(bundles = affected.len(), "Packages refreshed");
        self.fire_framework(FrameworkEventKind::PackagesRefreshed, &self.system, None);
        Ok(())
    }

    // ---- framework ----

    pub(crate) fn init_framework(&self) -> Result<()> {
        let _guard = self.system.begin_transition()?;
        self.init_locked()
    }

    fn init_locked(&self) -> Result<()> {
        if self.system.state().is_active() {
            return Ok(());
        }
        if !self.restored.swap(true, Ordering::SeqCst) {
            if self.config.storage_clean == StorageClean::OnFirstInit {
                self.storage.clean()?;
            }
            self.restore()?;
        }
        let context = BundleContext::new(self.system_bundle());
        {
            let mut inner = self.system.inner();
            inner.context = Some(context);
            inner.state = BundleState::Starting;
        }
        info!(bundles = read_lock(&self.bundles).len() - 1, "Framework initialized");
        Ok(())
    }

    /// Load persisted bundles into INSTALLED state without firing events
    fn restore(&self) -> Result<()> {
        let mut highest = 0;
        for (archive, content) in self.storage.load_all()? {
            let id = archive.id();
            highest = highest.max(id);
            let revision = match BundleRevision::from_content(id, content) {
                Ok(r) => Arc::new(r),
                Err(e) => {
                    warn!(bundle_id = id, error = %e, "Skipping bundle with unreadable manifest");
                    continue;
                }
            };
            let meta = archive.meta();
            let data = BundleData::new(id, &meta.location, Some(archive), Arc::clone(&revision), meta.last_modified);
            lock(&self.resolver).add_revision(revision);
            write_lock(&self.bundles).insert(id, data);
            debug!(bundle_id = id, location = %meta.location, "Bundle restored");
        }
        if self.storage.next_bundle_id()? <= highest {
            self.storage.set_next_bundle_id(highest + 1)?;
        }
        Ok(())
    }

    pub(crate) fn start_framework(&self) -> Result<()> {
        let _guard = self.system.begin_transition()?;
        if self.system.state() == BundleState::Active {
            return Ok(());
        }
        self.init_locked()?;

        self.resolve(None);
        let persistent: Vec<Arc<BundleData>> = read_lock(&self.bundles)
            .values()
            .filter(|d| d.id != SYSTEM_BUNDLE_ID)
            .filter(|d| d.archive.as_ref().map(|a| a.meta().persistent_start).unwrap_or(false))
            .cloned()
            .collect();
        for data in &persistent {
            let _bundle_guard = match data.begin_transition() {
                Ok(g) => g,
                Err(e) => {
                    warn!(bundle_id = data.id, error = %e, "Skipping bundle during framework start");
                    continue;
                }
            };
            if data.state() != BundleState::Resolved || data.current_revision().is_fragment() {
                if data.state() == BundleState::Installed {
                    let message = format!("Bundle {} could not be resolved", data.id);
                    self.fire_framework(FrameworkEventKind::Error, data, Some(message));
                }
                continue;
            }
            if let Err(e) = self.do_start(data) {
                warn!(bundle_id = data.id, error = %e, "Persistent start failed");
            }
        }

        self.system.inner().state = BundleState::Active;
        info!(started = persistent.len(), "Framework started");
        self.fire_framework(FrameworkEventKind::Started, &self.system, None);
        Ok(())
    }

    pub(crate) fn stop_framework(&self) -> Result<()> {
        let _guard = self.system.begin_transition()?;
        if !self.system.state().is_active() {
            return Ok(());
        }
        self.system.inner().state = BundleState::Stopping;

        let bundles: Vec<Arc<BundleData>> = read_lock(&self.bundles)
            .values()
            .filter(|d| d.id != SYSTEM_BUNDLE_ID)
            .cloned()
            .collect();
        for data in bundles.iter().rev() {
            let _bundle_guard = match data.begin_transition() {
                Ok(g) => g,
                Err(e) => {
                    warn!(bundle_id = data.id, error = %e, "Skipping bundle during framework stop");
                    continue;
                }
            };
            if data.state() == BundleState::Active {
                if let Err(e) = self.do_stop(data) {
                    warn!(bundle_id = data.id, error = %e, "Stop during shutdown failed");
                }
            }
        }

        info!("Framework stopped");
        self.fire_framework(FrameworkEventKind::Stopped, &self.system, None);
        let context = self.system.inner().context.clone();
        if let Some(context) = context {
            self.cleanup_context(&self.system, &context);
        }
        self.system.inner().state = BundleState::Resolved;
        Ok(())
    }

    // ---- transitions (caller holds the transition claim) ----

    fn ensure_resolved(&self, data: &Arc<BundleData>) -> Result<()> {
        if data.state() != BundleState::Installed {
            return Ok(());
        }
        let report = self.resolve(Some(std::slice::from_ref(data)));
        if data.state().is_resolved() {
            return Ok(());
        }
        let revision = data.current_revision().id();
        let message = match report.failure(revision) {
            Some(failure) => failure.to_string(),
            None => format!("Unable to resolve {}", revision),
        };
        Err(FrameworkError::bundle(BundleErrorKind::ResolveError, message))
    }

    /// RESOLVED -> STARTING -> ACTIVE, or back to RESOLVED through
    /// STOPPING when the activator fails
    fn do_start(&self, data: &Arc<BundleData>) -> Result<()> {
        let context = BundleContext::new(self.handle(data));
        let activator_name = {
            let mut inner = data.inner();
            inner.state = BundleState::Starting;
            inner.context = Some(context.clone());
            inner.current.description().activator.clone()
        };
        self.fire_bundle(BundleEventKind::Starting, data);

        let outcome: std::result::Result<_, BoxError> = match activator_name {
            None => Ok(None),
            Some(name) => match self.activators.create(&name) {
                None => Err(format!("No activator registered under {}", name).into()),
                Some(mut activator) => {
                    let started = guarded(|| activator.start(&context));
                    started.map(|_| Some(activator))
                }
            },
        };

        match outcome {
            Ok(activator) => {
                {
                    let mut inner = data.inner();
                    inner.activator = activator;
                    inner.state = BundleState::Active;
                }
                info!(bundle_id = data.id, "Bundle started");
                self.fire_bundle(BundleEventKind::Started, data);
                Ok(())
            }
            Err(cause) => {
                error!(bundle_id = data.id, error = %cause, "Bundle activator failed to start");
                data.inner().state = BundleState::Stopping;
                self.fire_bundle(BundleEventKind::Stopping, data);
                self.cleanup_context(data, &context);
                data.inner().state = BundleState::Resolved;
                self.fire_bundle(BundleEventKind::Stopped, data);
                let message = format!("Activator of bundle {} failed to start: {}", data.id, cause);
                self.fire_framework(FrameworkEventKind::Error, data, Some(message.clone()));
                Err(FrameworkError::bundle_with_source(BundleErrorKind::ActivatorError, message, cause))
            }
        }
    }

    /// ACTIVE -> STOPPING -> RESOLVED; cleanup always completes, an
    /// activator failure is reported afterwards
    fn do_stop(&self, data: &Arc<BundleData>) -> Result<()> {
        let (activator, context) = {
            let mut inner = data.inner();
            inner.state = BundleState::Stopping;
            (inner.activator.take(), inner.context.clone())
        };
        self.fire_bundle(BundleEventKind::Stopping, data);

        let outcome = match (activator, &context) {
            (Some(mut activator), Some(context)) => guarded(|| activator.stop(context)),
            _ => Ok(()),
        };
        if let Some(context) = &context {
            self.cleanup_context(data, context);
        }
        data.inner().state = BundleState::Resolved;
        info!(bundle_id = data.id, "Bundle stopped");
        self.fire_bundle(BundleEventKind::Stopped, data);

        outcome.map_err(|cause| {
            error!(bundle_id = data.id, error = %cause, "Bundle activator failed to stop");
            let message = format!("Activator of bundle {} failed to stop: {}", data.id, cause);
            self.fire_framework(FrameworkEventKind::Error, data, Some(message.clone()));
            FrameworkError::bundle_with_source(BundleErrorKind::ActivatorError, message, cause)
        })
    }

    /// Invalidate the context and drop everything registered through it
    fn cleanup_context(&self, data: &Arc<BundleData>, context: &BundleContext) {
        context.invalidate();
        let listeners = self.events.remove_owner(data.id);
        self.registry.unregister_all(data.id);
        self.registry.release_all(&self.handle(data));
        data.inner().context = None;
        debug!(bundle_id = data.id, listeners, "Bundle context released");
    }
}
