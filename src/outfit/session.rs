//! The outfit session: history, pose cache and background state driven by
//! user intents, rendering through an `ImageSynthesizer`.
//!
//! Operations that call the image service follow the same shape:
//! 1. Under the state lock, check preconditions and capture inputs. A failed
//!    precondition returns `Outcome::Declined` without touching state.
//! 2. Mark the session busy and publish the pending selection.
//! 3. Await the render (bounded by the render timeout and cancellable).
//! 4. Under the lock again, commit the result or record the error. Nothing
//!    is committed if the operation was superseded by `initialize`.
//!
//! The busy flag is owned by an `Operation` guard and cleared when it drops,
//! so every exit path releases it.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::history::OutfitHistory;
use super::types::{DeclineReason, ImageRef, Outcome, SavedOutfit, SessionView};
use crate::catalog::{Catalog, Wardrobe, WardrobeItem};
use crate::error::{friendly_message, TryOnError};
use crate::storage::{KeyValueStore, SavedOutfitStore};
use crate::synthesis::image_prep::{prepare_upload, MAX_UPLOAD_DIMENSION};
use crate::synthesis::ImageSynthesizer;

/// Default bound on a single render.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(120);

struct SessionState {
    history: Option<OutfitHistory>,
    /// The unmodified model image; outfits are reloaded on top of it.
    base_image: Option<ImageRef>,
    active_pose: usize,
    active_background: String,
    pending_pose: Option<usize>,
    pending_background: Option<String>,
    busy: bool,
    progress: Option<String>,
    last_error: Option<String>,
    /// Id of the in-flight operation, if any.
    current_op: Option<u64>,
    next_op: u64,
    cancel: Option<CancellationToken>,
    wardrobe: Wardrobe,
}

impl SessionState {
    fn display_image(&self) -> Option<&ImageRef> {
        self.history
            .as_ref()
            .and_then(|h| h.display_image(self.active_pose))
    }

    /// Abandon any in-flight operation; its result will not be committed.
    fn abandon_operation(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.current_op = None;
        self.busy = false;
        self.progress = None;
        self.pending_pose = None;
        self.pending_background = None;
    }

    fn reset(&mut self, base_image: Option<ImageRef>, default_background: &str) {
        self.abandon_operation();
        self.history = base_image.clone().map(OutfitHistory::new);
        self.base_image = base_image;
        self.active_pose = 0;
        self.active_background = default_background.to_string();
        self.last_error = None;
    }
}

/// Owns the outfit history and every piece of session UI state.
pub struct OutfitSession {
    synthesizer: Arc<dyn ImageSynthesizer>,
    outfits: SavedOutfitStore,
    catalog: Catalog,
    default_background: String,
    render_timeout: Duration,
    max_upload_dimension: u32,
    state: Mutex<SessionState>,
    view_tx: watch::Sender<SessionView>,
}

/// An in-flight operation. Dropping it clears the busy flag, unless the
/// operation has already been superseded.
struct Operation<'a> {
    session: &'a OutfitSession,
    id: u64,
    token: CancellationToken,
}

impl Operation<'_> {
    fn is_current(&self, state: &SessionState) -> bool {
        state.current_op == Some(self.id)
    }
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        let released = {
            let mut state = self.session.state();
            if self.is_current(&state) {
                state.current_op = None;
                state.cancel = None;
                state.busy = false;
                state.progress = None;
                state.pending_pose = None;
                state.pending_background = None;
                true
            } else {
                false
            }
        };
        if released {
            self.session.publish();
        }
    }
}

impl OutfitSession {
    /// Create a session with no model yet.
    ///
    /// The catalog must contain at least one background; use
    /// `catalog::validate_catalog` on custom catalogs.
    pub fn new(
        synthesizer: Arc<dyn ImageSynthesizer>,
        store: Arc<dyn KeyValueStore>,
        catalog: Catalog,
    ) -> Self {
        let default_background = catalog
            .default_background()
            .map(|b| b.id.clone())
            .unwrap_or_default();

        let state = SessionState {
            history: None,
            base_image: None,
            active_pose: 0,
            active_background: default_background.clone(),
            pending_pose: None,
            pending_background: None,
            busy: false,
            progress: None,
            last_error: None,
            current_op: None,
            next_op: 1,
            cancel: None,
            wardrobe: catalog.wardrobe.clone(),
        };

        let (view_tx, _) = watch::channel(SessionView::default());
        let session = Self {
            synthesizer,
            outfits: SavedOutfitStore::new(store),
            catalog,
            default_background,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            max_upload_dimension: MAX_UPLOAD_DIMENSION,
            state: Mutex::new(state),
            view_tx,
        };
        session.publish();
        session
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    /// Longest edge uploads are downsized to before rendering.
    pub fn with_max_upload_dimension(mut self, max_dimension: u32) -> Self {
        self.max_upload_dimension = max_dimension;
        self
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- queries ----

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Current state for the presentation layer.
    pub fn view(&self) -> SessionView {
        let state = self.state();
        self.build_view(&state)
    }

    /// Receive a new `SessionView` on every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_tx.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.state().busy
    }

    pub fn display_image(&self) -> Option<ImageRef> {
        self.state().display_image().cloned()
    }

    pub fn active_pose(&self) -> usize {
        self.state().active_pose
    }

    pub fn active_background(&self) -> String {
        self.state().active_background.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    /// A copy of the outfit history, if a model exists.
    pub fn history(&self) -> Option<OutfitHistory> {
        self.state().history.clone()
    }

    pub fn wardrobe(&self) -> Vec<WardrobeItem> {
        self.state().wardrobe.items().to_vec()
    }

    /// Add a garment to the wardrobe without wearing it. False if the id is known.
    pub fn register_garment(&self, item: WardrobeItem) -> bool {
        self.state().wardrobe.register(item)
    }

    pub fn saved_outfits(&self) -> Result<Vec<SavedOutfit>, TryOnError> {
        self.outfits.list()
    }

    fn build_view(&self, state: &SessionState) -> SessionView {
        let (cached_poses, cursor, layer_count, garments) = match &state.history {
            Some(h) => (
                h.active_layer().cached_poses(),
                h.cursor(),
                h.len(),
                h.active_garments(),
            ),
            None => (Vec::new(), 0, 0, Vec::new()),
        };
        SessionView {
            display_image: state.display_image().cloned(),
            cached_poses,
            active_pose_index: state.active_pose,
            pending_pose_index: state.pending_pose,
            active_background_id: state.active_background.clone(),
            pending_background_id: state.pending_background.clone(),
            cursor,
            layer_count,
            garments,
            busy: state.busy,
            progress_message: state.progress.clone(),
            last_error: state.last_error.clone(),
        }
    }

    fn publish(&self) {
        let view = self.view();
        self.view_tx.send_replace(view);
    }

    fn background_prompt(&self, id: &str) -> String {
        self.catalog
            .background(id)
            .map(|b| b.prompt.clone())
            .unwrap_or_default()
    }

    // ---- operation plumbing ----

    /// Mark the session busy. Caller holds the state lock and has checked `busy`.
    fn begin(&self, state: &mut SessionState, progress: String) -> Operation<'_> {
        let id = state.next_op;
        state.next_op += 1;
        let token = CancellationToken::new();
        state.current_op = Some(id);
        state.cancel = Some(token.clone());
        state.busy = true;
        state.progress = Some(progress);
        state.last_error = None;
        Operation {
            session: self,
            id,
            token,
        }
    }

    /// Await a render, bounded by the timeout and the operation's cancel token.
    async fn render<F>(&self, op: &Operation<'_>, render: F) -> Result<ImageRef, TryOnError>
    where
        F: Future<Output = Result<ImageRef, TryOnError>>,
    {
        tokio::select! {
            _ = op.token.cancelled() => Err(TryOnError::Cancelled),
            result = tokio::time::timeout(self.render_timeout, render) => match result {
                Ok(result) => result,
                Err(_) => Err(TryOnError::Timeout(self.render_timeout)),
            },
        }
    }

    /// Finish an operation: commit `result` or record its error, then release busy.
    fn settle<T, F>(
        &self,
        op: Operation<'_>,
        result: Result<T, TryOnError>,
        context: &str,
        commit: F,
    ) -> Result<Outcome, TryOnError>
    where
        F: FnOnce(&mut SessionState, T),
    {
        let outcome = {
            let mut state = self.state();
            if !op.is_current(&state) {
                debug!("{}: result discarded, session was reset", context);
                Err(TryOnError::Cancelled)
            } else {
                match result {
                    Ok(value) => {
                        commit(&mut *state, value);
                        state.last_error = None;
                        Ok(Outcome::Rendered)
                    }
                    Err(err) => {
                        let message = friendly_message(context, &err);
                        warn!("{}", message);
                        state.last_error = Some(message);
                        Err(err)
                    }
                }
            }
        };
        drop(op);
        outcome
    }

    fn decline(&self, operation: &str, reason: DeclineReason) -> Result<Outcome, TryOnError> {
        debug!("{} declined: {:?}", operation, reason);
        Ok(Outcome::Declined(reason))
    }

    // ---- operations ----

    /// Start over from `base_image`: one bare layer, first pose, default
    /// background. Abandons any in-flight render.
    pub fn initialize(&self, base_image: ImageRef) {
        {
            let mut state = self.state();
            state.reset(Some(base_image), &self.default_background);
        }
        info!("Session initialized with a new model image");
        self.publish();
    }

    /// Clear the model and history entirely.
    pub fn start_over(&self) {
        {
            let mut state = self.state();
            state.reset(None, &self.default_background);
        }
        info!("Session cleared");
        self.publish();
    }

    /// Cancel the in-flight render, if any. It fails with `Cancelled` and
    /// rolls back like any other failure.
    pub fn cancel(&self) -> bool {
        let token = self.state().cancel.clone();
        match token {
            Some(token) => {
                info!("Cancelling in-flight operation");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Generate a model image from an uploaded photo and start a session on it.
    pub async fn create_model(&self, photo: ImageRef) -> Result<Outcome, TryOnError> {
        let op = {
            let mut state = self.state();
            if state.busy {
                return self.decline("create_model", DeclineReason::Busy);
            }
            self.begin(&mut state, "Creating your model...".to_string())
        };
        self.publish();

        let result = self
            .render(&op, self.synthesizer.render_model(&photo))
            .await;

        let default_background = self.default_background.clone();
        self.settle(op, result, "Failed to create model", |state, image| {
            info!("Model created");
            state.history = Some(OutfitHistory::new(image.clone()));
            state.base_image = Some(image);
            state.active_pose = 0;
            state.active_background = default_background;
        })
    }

    /// Normalise an uploaded photo and generate a model image from it.
    ///
    /// Undecodable or tiny uploads fail before the image service is called.
    pub async fn create_model_from_upload(&self, image_bytes: &[u8]) -> Result<Outcome, TryOnError> {
        if self.is_busy() {
            return self.decline("create_model", DeclineReason::Busy);
        }
        let photo = prepare_upload(image_bytes, self.max_upload_dimension)
            .map_err(|err| self.record_error("Failed to create model", err))?;
        self.create_model(photo).await
    }

    /// Put `garment` on the current outfit.
    ///
    /// If the layer just beyond the cursor already holds this garment (it was
    /// removed with `remove_last_garment`), the cursor moves onto it without
    /// rendering.
    pub async fn apply_garment(
        &self,
        garment: WardrobeItem,
        garment_image: ImageRef,
    ) -> Result<Outcome, TryOnError> {
        let (op, base, background_prompt, pose) = {
            let mut state = self.state();
            if state.history.is_none() {
                return self.decline("apply_garment", DeclineReason::NoModel);
            }
            if state.busy {
                return self.decline("apply_garment", DeclineReason::Busy);
            }

            let redo = state
                .history
                .as_mut()
                .is_some_and(|h| h.can_redo(&garment.id) && h.redo());
            if redo {
                state.active_pose = 0;
                state.last_error = None;
                drop(state);
                info!("Re-applied '{}' from history", garment.id);
                self.publish();
                return Ok(Outcome::Reused);
            }

            let Some(base) = state.display_image().cloned() else {
                return self.decline("apply_garment", DeclineReason::NoModel);
            };
            let background_prompt = self.background_prompt(&state.active_background);
            let pose = state.active_pose;
            let op = self.begin(&mut state, format!("Adding {}...", garment.name));
            (op, base, background_prompt, pose)
        };
        self.publish();
        info!("Applying garment '{}'", garment.id);

        let result = self
            .render(
                &op,
                self.synthesizer
                    .render_with_garment(&base, &garment_image, &background_prompt),
            )
            .await;

        self.settle(op, result, "Failed to apply garment", |state, image| {
            if let Some(history) = state.history.as_mut() {
                history.push(garment.clone(), pose, image);
                info!(
                    "Applied '{}', now at layer {} of {}",
                    garment.id,
                    history.cursor(),
                    history.len()
                );
            }
            state.active_pose = 0;
            if state.wardrobe.register(garment) {
                debug!("Added garment to wardrobe");
            }
        })
    }

    /// Step back to the previous layer. Later layers stay available for redo.
    pub fn remove_last_garment(&self) -> Outcome {
        let outcome = {
            let mut state = self.state();
            if state.history.is_none() {
                Outcome::Declined(DeclineReason::NoModel)
            } else if state.busy {
                Outcome::Declined(DeclineReason::Busy)
            } else if state.history.as_mut().is_some_and(|h| h.undo()) {
                state.active_pose = 0;
                state.last_error = None;
                Outcome::Reused
            } else {
                Outcome::Declined(DeclineReason::AtBaseLayer)
            }
        };
        if outcome == Outcome::Reused {
            info!("Removed last garment");
            self.publish();
        } else {
            debug!("remove_last_garment declined: {:?}", outcome);
        }
        outcome
    }

    /// Switch to pose `pose_index`, rendering it for the active layer if it
    /// has not been rendered yet.
    pub async fn select_pose(&self, pose_index: usize) -> Result<Outcome, TryOnError> {
        let (op, base, instruction, background_prompt, layer_index) = {
            let mut state = self.state();
            let Some(history) = state.history.as_ref() else {
                return self.decline("select_pose", DeclineReason::NoModel);
            };
            if state.busy {
                return self.decline("select_pose", DeclineReason::Busy);
            }
            if pose_index == state.active_pose {
                return self.decline("select_pose", DeclineReason::Unchanged);
            }
            let Some(instruction) = self.catalog.poses.instruction(pose_index) else {
                return self.decline("select_pose", DeclineReason::UnknownPose);
            };

            let layer = history.active_layer();
            if layer.has_pose(pose_index) {
                state.active_pose = pose_index;
                state.last_error = None;
                drop(state);
                debug!("Pose {} served from cache", pose_index);
                self.publish();
                return Ok(Outcome::Reused);
            }

            let Some(base) = layer.representative_image().cloned() else {
                return self.decline("select_pose", DeclineReason::NoModel);
            };
            let layer_index = history.cursor();
            let instruction = instruction.to_string();
            let background_prompt = self.background_prompt(&state.active_background);

            let op = self.begin(&mut state, "Changing pose...".to_string());
            state.pending_pose = Some(pose_index);
            (op, base, instruction, background_prompt, layer_index)
        };
        self.publish();
        info!("Rendering pose {} ('{}')", pose_index, instruction);

        let result = self
            .render(
                &op,
                self.synthesizer
                    .render_pose_variation(&base, &instruction, &background_prompt),
            )
            .await;

        self.settle(op, result, "Failed to change pose", |state, image| {
            if let Some(layer) = state
                .history
                .as_mut()
                .and_then(|h| h.layer_mut(layer_index))
            {
                layer.insert_pose(pose_index, image);
            }
            state.active_pose = pose_index;
        })
    }

    /// Re-render the active layer in front of another background. Every other
    /// cached pose of the layer shows the old background and is dropped.
    pub async fn change_background(&self, background_id: &str) -> Result<Outcome, TryOnError> {
        let (op, base, background_prompt, layer_index, pose) = {
            let mut state = self.state();
            if state.history.is_none() {
                return self.decline("change_background", DeclineReason::NoModel);
            }
            if state.busy {
                return self.decline("change_background", DeclineReason::Busy);
            }
            if background_id == state.active_background {
                return self.decline("change_background", DeclineReason::Unchanged);
            }
            let Some(background) = self.catalog.background(background_id) else {
                return self.decline("change_background", DeclineReason::UnknownBackground);
            };
            let Some(base) = state.display_image().cloned() else {
                return self.decline("change_background", DeclineReason::NoModel);
            };
            let layer_index = state.history.as_ref().map_or(0, |h| h.cursor());
            let pose = state.active_pose;
            let background_prompt = background.prompt.clone();

            let op = self.begin(&mut state, "Changing background...".to_string());
            state.pending_background = Some(background_id.to_string());
            (op, base, background_prompt, layer_index, pose)
        };
        self.publish();
        info!("Changing background to '{}'", background_id);

        let result = self
            .render(
                &op,
                self.synthesizer.render_background(&base, &background_prompt),
            )
            .await;

        let background_id = background_id.to_string();
        self.settle(op, result, "Failed to change background", |state, image| {
            if let Some(layer) = state
                .history
                .as_mut()
                .and_then(|h| h.layer_mut(layer_index))
            {
                layer.reset_poses(pose, image);
            }
            state.active_background = background_id;
        })
    }

    /// Persist the current garment sequence under `name`.
    ///
    /// Declined unless at least one garment is worn.
    pub fn save_snapshot(&self, name: &str) -> Result<Outcome, TryOnError> {
        let outfit = {
            let state = self.state();
            let Some(history) = state.history.as_ref() else {
                return self.decline("save_snapshot", DeclineReason::NoModel);
            };
            if history.cursor() < 1 {
                return self.decline("save_snapshot", DeclineReason::NoGarments);
            }
            let Some(thumbnail) = state.display_image().cloned() else {
                return self.decline("save_snapshot", DeclineReason::NoModel);
            };
            let name = match name.trim() {
                "" => "Untitled outfit",
                trimmed => trimmed,
            };
            SavedOutfit::new(name, thumbnail, history.active_garments())
        };

        match self.outfits.save(&outfit) {
            Ok(()) => Ok(Outcome::Saved),
            Err(err) => Err(self.record_error("Failed to save outfit", err)),
        }
    }

    /// Remove a saved outfit. The active history is not affected.
    pub fn delete_snapshot(&self, id: &str) -> Result<bool, TryOnError> {
        self.outfits
            .delete(id)
            .map_err(|err| self.record_error("Failed to delete outfit", err))
    }

    /// Rebuild a saved outfit on the bare model, garment by garment, under the
    /// default background. The new history replaces the current one only if
    /// every render succeeds.
    pub async fn load_snapshot(&self, snapshot: &SavedOutfit) -> Result<Outcome, TryOnError> {
        let (op, base) = {
            let mut state = self.state();
            let Some(base) = state.base_image.clone() else {
                return self.decline("load_snapshot", DeclineReason::NoModel);
            };
            if state.busy {
                return self.decline("load_snapshot", DeclineReason::Busy);
            }
            let op = self.begin(&mut state, format!("Loading outfit \"{}\"...", snapshot.name));
            (op, base)
        };
        self.publish();

        let background_prompt = self.background_prompt(&self.default_background);
        let garments: Vec<WardrobeItem> = snapshot.garments.iter().flatten().cloned().collect();
        let garment_count = garments.len();
        info!(
            "Loading outfit '{}' with {} garments",
            snapshot.name,
            garments.len()
        );

        let mut scratch = OutfitHistory::new(base);
        let mut result = Ok(());
        for (step, garment) in garments.iter().enumerate() {
            let Some(current) = scratch.display_image(0).cloned() else {
                break;
            };
            let garment_image = ImageRef::new(garment.image_url.clone());
            match self
                .render(
                    &op,
                    self.synthesizer
                        .render_with_garment(&current, &garment_image, &background_prompt),
                )
                .await
            {
                Ok(image) => {
                    debug!("Loaded step {} of {}: '{}'", step + 1, garments.len(), garment.id);
                    scratch.push(garment.clone(), 0, image);
                }
                Err(err) => {
                    warn!("Outfit load stopped at '{}'", garment.id);
                    result = Err(err);
                    break;
                }
            }
        }

        let default_background = self.default_background.clone();
        let outcome = self.settle(
            op,
            result.map(|()| scratch),
            "Failed to load outfit",
            |state, history| {
                for garment in garments {
                    state.wardrobe.register(garment);
                }
                state.history = Some(history);
                state.active_pose = 0;
                state.active_background = default_background;
            },
        )?;

        info!("Loaded outfit '{}'", snapshot.name);
        if garment_count == 0 {
            return Ok(Outcome::Reused);
        }
        Ok(outcome)
    }

    fn record_error(&self, context: &str, err: TryOnError) -> TryOnError {
        let message = friendly_message(context, &err);
        warn!("{}", message);
        self.state().last_error = Some(message);
        self.publish();
        err
    }
}
