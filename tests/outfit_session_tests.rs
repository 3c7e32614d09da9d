use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use fitcheck::catalog::default_catalog;
use fitcheck::{
    DeclineReason, ImageRef, ImageSynthesizer, KeyValueStore, MemoryStore, OutfitSession,
    Outcome, TryOnError, WardrobeItem,
};

/// Scripted image service: numbered results, optional failures, optional
/// gate or hang to hold a render in flight.
#[derive(Default)]
struct FakeSynth {
    calls: AtomicUsize,
    fail_calls: Mutex<HashSet<usize>>,
    log: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
    hang: AtomicBool,
}

impl FakeSynth {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the call with this 1-based number fail.
    fn fail_call(&self, n: usize) {
        self.fail_calls.lock().unwrap().insert(n);
    }

    fn fail_next(&self) {
        self.fail_call(self.calls() + 1);
    }

    fn hang(&self, on: bool) {
        self.hang.store(on, Ordering::SeqCst);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    async fn respond(&self, entry: String) -> Result<ImageRef, TryOnError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.lock().unwrap().push(entry);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_calls.lock().unwrap().contains(&n) {
            return Err(TryOnError::Synthesis(format!("render {} failed", n)));
        }
        Ok(ImageRef::new(format!("r{}", n)))
    }
}

#[async_trait]
impl ImageSynthesizer for FakeSynth {
    async fn render_with_garment(
        &self,
        base: &ImageRef,
        garment: &ImageRef,
        background_prompt: &str,
    ) -> Result<ImageRef, TryOnError> {
        self.respond(format!(
            "garment base={} garment={} bg={}",
            base.as_str(),
            garment.as_str(),
            background_prompt
        ))
        .await
    }

    async fn render_pose_variation(
        &self,
        base: &ImageRef,
        pose_instruction: &str,
        background_prompt: &str,
    ) -> Result<ImageRef, TryOnError> {
        self.respond(format!(
            "pose base={} pose={} bg={}",
            base.as_str(),
            pose_instruction,
            background_prompt
        ))
        .await
    }

    async fn render_background(
        &self,
        base: &ImageRef,
        background_prompt: &str,
    ) -> Result<ImageRef, TryOnError> {
        self.respond(format!("background base={} bg={}", base.as_str(), background_prompt))
            .await
    }

    async fn render_model(&self, photo: &ImageRef) -> Result<ImageRef, TryOnError> {
        self.respond(format!("model photo={}", photo.as_str())).await
    }
}

/// Store whose writes can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl KeyValueStore for FlakyStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, TryOnError> {
        self.inner.load(key)
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), TryOnError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TryOnError::Storage("quota exceeded".to_string()));
        }
        self.inner.save(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), TryOnError> {
        self.inner.remove(key)
    }
}

fn garment(id: &str) -> WardrobeItem {
    WardrobeItem::new(id, format!("The {}", id), format!("{}.png", id))
}

fn garment_image(item: &WardrobeItem) -> ImageRef {
    ImageRef::new(item.image_url.clone())
}

fn new_session(synth: Arc<FakeSynth>) -> OutfitSession {
    OutfitSession::new(synth, Arc::new(MemoryStore::new()), default_catalog())
}

fn started_session(synth: Arc<FakeSynth>) -> OutfitSession {
    let session = new_session(synth);
    session.initialize(ImageRef::new("B0"));
    session
}

async fn apply(session: &OutfitSession, item: &WardrobeItem) -> Result<Outcome, TryOnError> {
    session.apply_garment(item.clone(), garment_image(item)).await
}

fn assert_invariants(session: &OutfitSession) {
    if let Some(history) = session.history() {
        assert!(history.cursor() < history.len());
        assert!(history.layers()[0].garment.is_none());
    }
}

async fn wait_until_busy(session: &OutfitSession) {
    while !session.is_busy() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_scenario_a_apply_garment() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    let shirt = WardrobeItem::new("shirt-x", "Custom Shirt", "data:image/png;base64,AAAA");

    let outcome = apply(&session, &shirt).await.unwrap();

    assert_eq!(outcome, Outcome::Rendered);
    assert_eq!(session.display_image(), Some(ImageRef::new("r1")));
    assert!(session.wardrobe().iter().any(|g| g.id == "shirt-x"));
    assert_eq!(synth.calls(), 1);
    assert!(synth.log()[0].starts_with("garment base=B0 garment=data:image/png;base64,AAAA"));
    assert!(synth.log()[0].contains("light-gray backdrop"));

    let view = session.view();
    assert_eq!(view.cursor, 1);
    assert_eq!(view.layer_count, 2);
    assert!(view.last_error.is_none());
    assert_invariants(&session);
}

#[tokio::test]
async fn test_wardrobe_registration_preserves_order_and_dedups() {
    let synth = FakeSynth::new();
    let session = started_session(synth);
    let before = session.wardrobe().len();

    let hat = garment("hat");
    apply(&session, &hat).await.unwrap();
    session.remove_last_garment();
    // Different layer after a branch: still only one wardrobe entry.
    apply(&session, &garment("scarf")).await.unwrap();
    session.remove_last_garment();
    apply(&session, &hat).await.unwrap();

    let wardrobe = session.wardrobe();
    assert_eq!(wardrobe.len(), before + 2);
    assert_eq!(wardrobe[before].id, "hat");
    assert_eq!(wardrobe[before + 1].id, "scarf");
}

#[tokio::test]
async fn test_scenario_b_remove_then_redo_without_render() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    let shirt = garment("shirt");
    apply(&session, &shirt).await.unwrap();
    let layer_before = session.history().unwrap().layers()[1].clone();

    assert_eq!(session.remove_last_garment(), Outcome::Reused);
    assert_eq!(session.view().cursor, 0);
    assert_eq!(session.display_image(), Some(ImageRef::new("B0")));
    assert_eq!(session.history().unwrap().len(), 2);

    let outcome = apply(&session, &shirt).await.unwrap();
    assert_eq!(outcome, Outcome::Reused);
    assert_eq!(synth.calls(), 1);
    assert_eq!(session.view().cursor, 1);
    assert_eq!(session.history().unwrap().layers()[1], layer_before);
    assert_invariants(&session);
}

#[tokio::test]
async fn test_remove_last_garment_at_base_is_noop() {
    let session = started_session(FakeSynth::new());
    assert_eq!(
        session.remove_last_garment(),
        Outcome::Declined(DeclineReason::AtBaseLayer)
    );
    assert_eq!(session.view().cursor, 0);
}

#[tokio::test]
async fn test_redo_advances_one_layer_per_call() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    let shirt = garment("shirt");
    let jacket = garment("jacket");
    apply(&session, &shirt).await.unwrap();
    apply(&session, &jacket).await.unwrap();
    session.remove_last_garment();
    session.remove_last_garment();
    assert_eq!(synth.calls(), 2);

    assert_eq!(apply(&session, &shirt).await.unwrap(), Outcome::Reused);
    assert_eq!(session.view().cursor, 1);
    // The same garment again is no longer ahead of the cursor: a real render.
    assert_eq!(apply(&session, &shirt).await.unwrap(), Outcome::Rendered);
    assert_eq!(synth.calls(), 3);
    assert_eq!(session.history().unwrap().len(), 3);
    assert_invariants(&session);
}

#[tokio::test]
async fn test_redo_chain_reuses_every_layer() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    let shirt = garment("shirt");
    let jacket = garment("jacket");
    apply(&session, &shirt).await.unwrap();
    apply(&session, &jacket).await.unwrap();
    session.remove_last_garment();
    session.remove_last_garment();

    assert_eq!(apply(&session, &shirt).await.unwrap(), Outcome::Reused);
    assert_eq!(apply(&session, &jacket).await.unwrap(), Outcome::Reused);
    assert_eq!(synth.calls(), 2);
    assert_eq!(session.view().cursor, 2);
    assert_eq!(session.display_image(), Some(ImageRef::new("r2")));
}

#[tokio::test]
async fn test_apply_different_garment_after_undo_discards_branch() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    apply(&session, &garment("shirt")).await.unwrap();
    apply(&session, &garment("jacket")).await.unwrap();
    session.remove_last_garment();

    apply(&session, &garment("vest")).await.unwrap();
    let history = session.history().unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history.worn_garment_ids(), vec!["shirt", "vest"]);
    // Rendered on top of the shirt layer.
    assert!(synth.log()[2].starts_with("garment base=r1 garment=vest.png"));
}

#[tokio::test]
async fn test_apply_failure_leaves_state_unchanged() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    apply(&session, &garment("shirt")).await.unwrap();
    let before = session.history().unwrap();
    let wardrobe_before = session.wardrobe();

    synth.fail_next();
    let err = apply(&session, &garment("jacket")).await.unwrap_err();

    assert!(matches!(err, TryOnError::Synthesis(_)));
    assert_eq!(session.history().unwrap(), before);
    assert_eq!(session.wardrobe(), wardrobe_before);
    let view = session.view();
    assert!(!view.busy);
    assert!(view.progress_message.is_none());
    assert_eq!(
        view.last_error.as_deref(),
        Some("Failed to apply garment. render 2 failed")
    );

    // A later success clears the error.
    apply(&session, &garment("jacket")).await.unwrap();
    assert!(session.last_error().is_none());
}

#[tokio::test]
async fn test_scenario_c_pose_cache_miss_then_hit() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());

    assert_eq!(session.select_pose(2).await.unwrap(), Outcome::Rendered);
    assert_eq!(synth.calls(), 1);
    assert_eq!(session.active_pose(), 2);
    assert_eq!(session.display_image(), Some(ImageRef::new("r1")));
    assert!(synth.log()[0].starts_with("pose base=B0 pose=Side profile view"));
    let cached = session.history().unwrap().active_layer().cached_poses();
    assert_eq!(cached, vec![0, 2]);

    // Back to pose 0 and over to 2 again: both are cache hits.
    assert_eq!(session.select_pose(0).await.unwrap(), Outcome::Reused);
    assert_eq!(session.select_pose(2).await.unwrap(), Outcome::Reused);
    assert_eq!(synth.calls(), 1);
    assert_eq!(session.display_image(), Some(ImageRef::new("r1")));
}

#[tokio::test]
async fn test_scenario_c_pose_failure_reverts() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    session.select_pose(1).await.unwrap();

    synth.fail_next();
    let err = session.select_pose(2).await.unwrap_err();

    assert!(matches!(err, TryOnError::Synthesis(_)));
    assert_eq!(session.active_pose(), 1);
    let view = session.view();
    assert_eq!(view.active_pose_index, 1);
    assert!(view.pending_pose_index.is_none());
    assert_eq!(view.cached_poses, vec![0, 1]);
    assert!(view
        .last_error
        .unwrap()
        .starts_with("Failed to change pose."));
}

#[tokio::test]
async fn test_pose_render_uses_lowest_cached_pose_as_source() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    session.select_pose(3).await.unwrap();
    session.select_pose(1).await.unwrap();

    // Both renders start from the pose-0 image.
    assert!(synth.log()[0].starts_with("pose base=B0"));
    assert!(synth.log()[1].starts_with("pose base=B0"));
}

#[tokio::test]
async fn test_pending_pose_visible_while_rendering() {
    let gate = Arc::new(Notify::new());
    let synth = FakeSynth::gated(gate.clone());
    let session = started_session(synth.clone());
    let mut rx = session.subscribe();

    let observe = async {
        wait_until_busy(&session).await;
        let view = rx.borrow_and_update().clone();
        assert!(view.busy);
        assert_eq!(view.pending_pose_index, Some(4));
        assert_eq!(view.active_pose_index, 0);
        assert_eq!(view.progress_message.as_deref(), Some("Changing pose..."));
        gate.notify_one();
    };

    let (result, ()) = tokio::join!(session.select_pose(4), observe);
    assert_eq!(result.unwrap(), Outcome::Rendered);
    let view = session.view();
    assert_eq!(view.active_pose_index, 4);
    assert!(view.pending_pose_index.is_none());
    assert!(!view.busy);
}

#[tokio::test]
async fn test_scenario_d_background_change_evicts_other_poses() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    apply(&session, &garment("shirt")).await.unwrap();
    session.select_pose(1).await.unwrap();
    session.select_pose(2).await.unwrap();
    assert_eq!(
        session.history().unwrap().active_layer().cached_poses(),
        vec![0, 1, 2]
    );
    assert_eq!(session.active_background(), "studio");

    let outcome = session.change_background("city-street").await.unwrap();

    assert_eq!(outcome, Outcome::Rendered);
    assert_eq!(session.active_background(), "city-street");
    let history = session.history().unwrap();
    let layer = history.active_layer();
    assert_eq!(layer.cached_poses(), vec![2]);
    assert_eq!(layer.image_for(2), Some(&ImageRef::new("r4")));
    assert_eq!(session.display_image(), Some(ImageRef::new("r4")));
    assert!(synth.log()[3].starts_with("background base=r3 bg=a busy city street"));
    // The base layer keeps its own cache.
    assert_eq!(history.layers()[0].cached_poses(), vec![0]);
}

#[tokio::test]
async fn test_background_prompt_used_for_later_renders() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    session.change_background("beach").await.unwrap();
    apply(&session, &garment("shirt")).await.unwrap();
    session.select_pose(1).await.unwrap();

    let log = synth.log();
    assert!(log[1].ends_with("bg=a sunny sandy beach with gentle waves and a clear blue sky"));
    assert!(log[2].ends_with("bg=a sunny sandy beach with gentle waves and a clear blue sky"));
}

#[tokio::test]
async fn test_background_failure_reverts() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    session.select_pose(1).await.unwrap();

    synth.fail_next();
    let err = session.change_background("park").await.unwrap_err();

    assert!(matches!(err, TryOnError::Synthesis(_)));
    assert_eq!(session.active_background(), "studio");
    let view = session.view();
    assert!(view.pending_background_id.is_none());
    assert_eq!(view.cached_poses, vec![0, 1]);
    assert!(view
        .last_error
        .unwrap()
        .starts_with("Failed to change background."));
}

#[tokio::test]
async fn test_scenario_e_save_requires_a_garment() {
    let session = started_session(FakeSynth::new());
    assert_eq!(
        session.save_snapshot("Empty").unwrap(),
        Outcome::Declined(DeclineReason::NoGarments)
    );
    assert!(session.saved_outfits().unwrap().is_empty());
}

#[tokio::test]
async fn test_save_captures_active_sequence_and_thumbnail() {
    let session = started_session(FakeSynth::new());
    apply(&session, &garment("shirt")).await.unwrap();
    apply(&session, &garment("jacket")).await.unwrap();
    session.remove_last_garment();

    let history_before = session.history().unwrap();
    assert_eq!(session.save_snapshot("  Casual  ").unwrap(), Outcome::Saved);
    assert_eq!(session.history().unwrap(), history_before);

    let saved = session.saved_outfits().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].name, "Casual");
    assert_eq!(saved[0].garment_ids(), vec!["shirt"]);
    assert_eq!(saved[0].garments.len(), 2);
    assert!(saved[0].garments[0].is_none());
    assert_eq!(saved[0].thumbnail, ImageRef::new("r1"));
}

#[tokio::test]
async fn test_save_storage_failure_is_surfaced() {
    let store = Arc::new(FlakyStore::default());
    let session = OutfitSession::new(FakeSynth::new(), store.clone(), default_catalog());
    session.initialize(ImageRef::new("B0"));
    apply(&session, &garment("shirt")).await.unwrap();

    store.fail_writes.store(true, Ordering::SeqCst);
    let err = session.save_snapshot("Nope").unwrap_err();

    assert!(matches!(err, TryOnError::Storage(_)));
    assert_eq!(
        session.last_error().as_deref(),
        Some("Failed to save outfit. quota exceeded")
    );
    assert_eq!(session.history().unwrap().len(), 2);
}

#[tokio::test]
async fn test_save_then_load_round_trip() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    let sequence = ["shirt", "jacket", "scarf"];
    for id in sequence {
        apply(&session, &garment(id)).await.unwrap();
    }
    session.save_snapshot("Layers").unwrap();
    let saved = session.saved_outfits().unwrap().remove(0);

    // Wander off: undo, new branch, new background.
    session.remove_last_garment();
    session.remove_last_garment();
    apply(&session, &garment("hat")).await.unwrap();
    session.change_background("beach").await.unwrap();
    let calls_before = synth.calls();

    let outcome = session.load_snapshot(&saved).await.unwrap();

    assert_eq!(outcome, Outcome::Rendered);
    assert_eq!(synth.calls(), calls_before + 3);
    let history = session.history().unwrap();
    assert_eq!(history.worn_garment_ids(), sequence.to_vec());
    assert_eq!(history.cursor(), 3);
    assert_eq!(history.len(), 4);
    assert_eq!(session.active_background(), "studio");
    assert_eq!(session.active_pose(), 0);

    // Sequential: each step renders on the previous result, under the default background.
    let log = synth.log();
    let load_log = &log[calls_before..];
    assert!(load_log[0].starts_with("garment base=B0 garment=shirt.png"));
    assert!(load_log[1].starts_with(&format!("garment base=r{} garment=jacket.png", calls_before + 1)));
    assert!(load_log[2].starts_with(&format!("garment base=r{} garment=scarf.png", calls_before + 2)));
    assert!(load_log.iter().all(|l| l.contains("light-gray backdrop")));
    assert_invariants(&session);
}

#[tokio::test]
async fn test_load_failure_keeps_previous_history() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    apply(&session, &garment("shirt")).await.unwrap();
    apply(&session, &garment("jacket")).await.unwrap();
    session.save_snapshot("Two").unwrap();
    let saved = session.saved_outfits().unwrap().remove(0);

    session.remove_last_garment();
    session.change_background("park").await.unwrap();
    let before = session.history().unwrap();
    let view_before = session.view();

    // Second render of the load fails.
    synth.fail_call(synth.calls() + 2);
    let err = session.load_snapshot(&saved).await.unwrap_err();

    assert!(matches!(err, TryOnError::Synthesis(_)));
    assert_eq!(session.history().unwrap(), before);
    assert_eq!(session.active_background(), "park");
    let view = session.view();
    assert_eq!(view.cursor, view_before.cursor);
    assert_eq!(view.display_image, view_before.display_image);
    assert!(!view.busy);
    assert!(view.last_error.unwrap().starts_with("Failed to load outfit."));
}

#[tokio::test]
async fn test_load_without_model_is_declined() {
    let synth = FakeSynth::new();
    let session = new_session(synth.clone());
    let saved = fitcheck::SavedOutfit::new("X", ImageRef::new("t"), vec![None, Some(garment("shirt"))]);
    assert_eq!(
        session.load_snapshot(&saved).await.unwrap(),
        Outcome::Declined(DeclineReason::NoModel)
    );
    assert_eq!(synth.calls(), 0);
}

#[tokio::test]
async fn test_load_registers_unknown_garments() {
    let session = started_session(FakeSynth::new());
    let saved = fitcheck::SavedOutfit::new(
        "Imported",
        ImageRef::new("t"),
        vec![None, Some(garment("poncho"))],
    );
    session.load_snapshot(&saved).await.unwrap();
    assert!(session.wardrobe().iter().any(|g| g.id == "poncho"));
}

#[tokio::test]
async fn test_delete_snapshot_leaves_history() {
    let session = started_session(FakeSynth::new());
    apply(&session, &garment("shirt")).await.unwrap();
    session.save_snapshot("One").unwrap();
    session.save_snapshot("Two").unwrap();
    let saved = session.saved_outfits().unwrap();
    let history_before = session.history().unwrap();

    assert!(session.delete_snapshot(&saved[0].id).unwrap());
    assert!(!session.delete_snapshot("missing").unwrap());

    let remaining = session.saved_outfits().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "Two");
    assert_eq!(session.history().unwrap(), history_before);
}

#[tokio::test]
async fn test_busy_declines_other_operations() {
    let gate = Arc::new(Notify::new());
    let synth = FakeSynth::gated(gate.clone());
    let session = started_session(synth.clone());
    let shirt = garment("shirt");

    let contend = async {
        wait_until_busy(&session).await;
        assert_eq!(
            session.select_pose(1).await.unwrap(),
            Outcome::Declined(DeclineReason::Busy)
        );
        assert_eq!(
            session.change_background("beach").await.unwrap(),
            Outcome::Declined(DeclineReason::Busy)
        );
        assert_eq!(
            apply(&session, &garment("jacket")).await.unwrap(),
            Outcome::Declined(DeclineReason::Busy)
        );
        assert_eq!(
            session.remove_last_garment(),
            Outcome::Declined(DeclineReason::Busy)
        );
        let view = session.view();
        assert_eq!(view.progress_message.as_deref(), Some("Adding The shirt..."));
        gate.notify_one();
    };

    let (result, ()) = tokio::join!(apply(&session, &shirt), contend);
    assert_eq!(result.unwrap(), Outcome::Rendered);
    assert_eq!(synth.calls(), 1);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_busy_cleared_after_failure() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    synth.fail_next();
    assert!(apply(&session, &garment("shirt")).await.is_err());
    assert!(!session.is_busy());
    assert_eq!(apply(&session, &garment("shirt")).await.unwrap(), Outcome::Rendered);
}

#[tokio::test]
async fn test_render_timeout_rolls_back() {
    let synth = FakeSynth::new();
    synth.hang(true);
    let session = started_session(synth.clone()).with_render_timeout(Duration::from_millis(50));

    let err = session.select_pose(1).await.unwrap_err();

    assert_eq!(err, TryOnError::Timeout(Duration::from_millis(50)));
    assert!(!session.is_busy());
    assert_eq!(session.active_pose(), 0);
    assert!(session
        .last_error()
        .unwrap()
        .starts_with("Failed to change pose. Image generation timed out"));
}

#[tokio::test]
async fn test_cancel_in_flight_render() {
    let synth = FakeSynth::new();
    synth.hang(true);
    let session = started_session(synth.clone());

    let cancel = async {
        wait_until_busy(&session).await;
        assert!(session.cancel());
    };
    let (result, ()) = tokio::join!(session.change_background("loft"), cancel);

    assert_eq!(result.unwrap_err(), TryOnError::Cancelled);
    assert!(!session.is_busy());
    assert_eq!(session.active_background(), "studio");
    assert_eq!(session.history().unwrap().len(), 1);
}

#[tokio::test]
async fn test_initialize_discards_in_flight_result() {
    let gate = Arc::new(Notify::new());
    let synth = FakeSynth::gated(gate.clone());
    let session = started_session(synth.clone());

    let reset = async {
        wait_until_busy(&session).await;
        session.initialize(ImageRef::new("B9"));
        assert!(!session.is_busy());
        gate.notify_one();
    };
    let shirt = garment("shirt");
    let (result, ()) = tokio::join!(apply(&session, &shirt), reset);

    assert_eq!(result.unwrap_err(), TryOnError::Cancelled);
    let history = session.history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(session.display_image(), Some(ImageRef::new("B9")));
    assert!(session.last_error().is_none());
}

#[tokio::test]
async fn test_create_model_from_upload() {
    let synth = FakeSynth::new();
    let session = new_session(synth.clone()).with_max_upload_dimension(100);

    let mut png = std::io::Cursor::new(Vec::new());
    image::DynamicImage::new_rgb8(120, 200)
        .write_to(&mut png, image::ImageFormat::Png)
        .unwrap();

    let outcome = session.create_model_from_upload(png.get_ref()).await.unwrap();
    assert_eq!(outcome, Outcome::Rendered);
    assert_eq!(session.display_image(), Some(ImageRef::new("r1")));

    // The service saw the downsized PNG, not the raw upload.
    let sent = synth.log()[0]
        .strip_prefix("model photo=")
        .unwrap()
        .to_string();
    let (mime, bytes) = ImageRef::new(sent).decode_data_url().unwrap();
    assert_eq!(mime, "image/png");
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (60, 100));

    // Outfits reload on top of the generated model.
    apply(&session, &garment("shirt")).await.unwrap();
    session.save_snapshot("S").unwrap();
    let saved = session.saved_outfits().unwrap().remove(0);
    session.load_snapshot(&saved).await.unwrap();
    assert!(synth.log()[2].starts_with("garment base=r1 garment=shirt.png"));
}

#[tokio::test]
async fn test_create_model_from_undecodable_upload() {
    let synth = FakeSynth::new();
    let session = new_session(synth.clone());

    let err = session
        .create_model_from_upload(b"definitely not an image")
        .await
        .unwrap_err();

    assert!(matches!(err, TryOnError::Image(_)));
    assert_eq!(synth.calls(), 0);
    assert!(session.history().is_none());
    assert!(!session.is_busy());
    assert!(session
        .last_error()
        .unwrap()
        .starts_with("Failed to create model. Failed to load image"));
}

#[tokio::test]
async fn test_create_model_failure_keeps_session_empty() {
    let synth = FakeSynth::new();
    synth.fail_next();
    let session = new_session(synth);
    assert!(session.create_model(ImageRef::new("photo")).await.is_err());
    assert!(session.history().is_none());
    assert!(session
        .last_error()
        .unwrap()
        .starts_with("Failed to create model."));
}

#[tokio::test]
async fn test_invariants_hold_across_mixed_operations() {
    let synth = FakeSynth::new();
    let session = started_session(synth.clone());
    let shirt = garment("shirt");
    let jacket = garment("jacket");

    apply(&session, &shirt).await.unwrap();
    assert_invariants(&session);
    session.select_pose(3).await.unwrap();
    assert_invariants(&session);
    synth.fail_next();
    let _ = apply(&session, &jacket).await;
    assert_invariants(&session);
    session.remove_last_garment();
    session.remove_last_garment();
    assert_invariants(&session);
    apply(&session, &shirt).await.unwrap();
    session.change_background("loft").await.unwrap();
    assert_invariants(&session);
    apply(&session, &jacket).await.unwrap();
    assert_invariants(&session);

    let history = session.history().unwrap();
    assert_eq!(history.worn_garment_ids(), vec!["shirt", "jacket"]);
}
