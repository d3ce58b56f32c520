use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::foursquare::{BaseVenue, DetailedVenue, VenueService};
use crate::geo::GeoService;
use crate::pool::SelectionPool;
use crate::telemetry::TelemetryClient;

const PHOTO_SIZE: &str = "1024x1024";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Idle,
    LocatingUser,
    FetchingCandidates,
    ResolvingDetail,
    Settled,
    LocationError,
    NoCandidatesError,
}

impl EnginePhase {
    pub fn is_terminal_error(&self) -> bool {
        matches!(
            self,
            EnginePhase::LocationError | EnginePhase::NoCandidatesError
        )
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            EnginePhase::LocatingUser
                | EnginePhase::FetchingCandidates
                | EnginePhase::ResolvingDetail
        )
    }
}

/// Most-recent-first log of every venue shown this session. Uniqueness is
/// guaranteed upstream by pool exclusion; this only appends.
#[derive(Debug, Default)]
pub struct ResultHistory {
    entries: Vec<BaseVenue>,
}

impl ResultHistory {
    pub fn record(&mut self, venue: BaseVenue) {
        self.entries.insert(0, venue);
    }

    pub fn entries(&self) -> &[BaseVenue] {
        &self.entries
    }
}

/// What the presentation layer renders: the merge of the detailed venue when
/// enrichment succeeded, else the base venue with `degraded` set. Presentation
/// never branches on base-vs-detailed shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayableVenue {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    pub address: Vec<String>,
    pub rating: Option<f64>,
    pub rating_label: Option<String>,
    pub photo_url: Option<String>,
    pub canonical_url: Option<String>,
    pub degraded: bool,
}

impl DisplayableVenue {
    fn from_base(venue: &BaseVenue) -> Self {
        Self {
            id: venue.id.clone(),
            name: venue.name.clone(),
            category: venue.primary_category().map(|c| c.name.clone()),
            address: venue.location.formatted_address.clone(),
            rating: None,
            rating_label: None,
            photo_url: None,
            canonical_url: None,
            degraded: true,
        }
    }

    fn from_detail(detail: &DetailedVenue) -> Self {
        let rating_label = detail.rating.map(|rating| match detail.rating_signals {
            Some(signals) => format!("{rating}/10 ({signals})"),
            None => format!("{rating}/10"),
        });
        Self {
            id: detail.venue.id.clone(),
            name: detail.venue.name.clone(),
            category: detail.venue.primary_category().map(|c| c.name.clone()),
            address: detail.venue.location.formatted_address.clone(),
            rating: detail.rating,
            rating_label,
            photo_url: detail
                .best_photo
                .as_ref()
                .map(|photo| photo.sized_url(PHOTO_SIZE)),
            canonical_url: detail.canonical_url.clone(),
            degraded: false,
        }
    }
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoverySnapshot {
    pub phase: EnginePhase,
    pub current: Option<DisplayableVenue>,
    pub remaining_rerolls: u32,
    pub history: Vec<BaseVenue>,
    pub last_error: Option<String>,
}

impl DiscoverySnapshot {
    pub fn can_reroll(&self) -> bool {
        self.phase == EnginePhase::Settled && self.remaining_rerolls > 0
    }
}

#[derive(Debug)]
struct SessionState {
    phase: EnginePhase,
    pool: Option<SelectionPool>,
    current_pick: Option<BaseVenue>,
    current_detail: Option<DetailedVenue>,
    history: ResultHistory,
    remaining_rerolls: u32,
    last_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: EnginePhase::Idle,
            pool: None,
            current_pick: None,
            current_detail: None,
            history: ResultHistory::default(),
            remaining_rerolls: 0,
            last_error: None,
        }
    }
}

/// The discovery state machine. One roll: locate, fetch candidates, settle a
/// random pick with detail enrichment. Rerolls re-pick from the same pool
/// without touching geolocation or the venue source. Session state is owned
/// here exclusively; collaborators only get invoked, never reach in.
pub struct DiscoveryEngine {
    geo: GeoService,
    venues: VenueService,
    telemetry: TelemetryClient,
    reroll_budget: u32,
    state: Mutex<SessionState>,
    rng: Mutex<StdRng>,
    // Bumped by every start; transitions re-check it at each commit point so
    // a superseded session can never write into the fresh one.
    epoch: AtomicU64,
    // Serializes start/pick transitions: a reroll that arrives while a detail
    // lookup is in flight waits here until the engine settles.
    transition: AsyncMutex<()>,
}

impl DiscoveryEngine {
    pub fn new(
        geo: GeoService,
        venues: VenueService,
        telemetry: TelemetryClient,
        config: &AppConfig,
    ) -> Self {
        Self {
            geo,
            venues,
            telemetry,
            reroll_budget: config.reroll_budget,
            state: Mutex::new(SessionState::default()),
            rng: Mutex::new(StdRng::from_entropy()),
            epoch: AtomicU64::new(0),
            transition: AsyncMutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn with_rng(
        geo: GeoService,
        venues: VenueService,
        telemetry: TelemetryClient,
        config: &AppConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            geo,
            venues,
            telemetry,
            reroll_budget: config.reroll_budget,
            state: Mutex::new(SessionState::default()),
            rng: Mutex::new(rng),
            epoch: AtomicU64::new(0),
            transition: AsyncMutex::new(()),
        }
    }

    /// The "Find Me A Place" action: discards any previous session, locates
    /// the user, fetches candidates and settles an initial pick.
    pub async fn request_discovery(&self) -> AppResult<()> {
        // Claim the new session before queueing on the guard, so any
        // transition still in flight becomes stale immediately.
        let session = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let _transition = self.transition.lock().await;
        if self.is_stale(session) {
            debug!(session, "start superseded before it began");
            return Ok(());
        }

        {
            let mut state = self.state.lock();
            *state = SessionState {
                phase: EnginePhase::LocatingUser,
                ..SessionState::default()
            };
        }
        self.record_event("discovery_started", json!({ "session": session }));

        let position = match self.geo.current_position().await {
            Ok(position) => position,
            Err(err) => {
                warn!(?err, "geolocation failed");
                self.record_event("location_error", json!({ "reason": err.to_string() }));
                self.fail_session(session, EnginePhase::LocationError, &err);
                return Ok(());
            }
        };

        if !self.enter_phase(session, EnginePhase::FetchingCandidates) {
            return Ok(());
        }

        let candidates = match self.venues.explore(position).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(?err, "venue source failed");
                self.record_event("no_candidates", json!({ "reason": err.to_string() }));
                self.fail_session(session, EnginePhase::NoCandidatesError, &err);
                return Ok(());
            }
        };

        // An empty-but-successful explore is a contract violation by the
        // source; treat it the same as a failed fetch.
        let pool = match SelectionPool::new(candidates) {
            Ok(pool) => pool,
            Err(_) => {
                self.record_event("no_candidates", json!({ "reason": "empty result" }));
                self.fail_session(session, EnginePhase::NoCandidatesError, &AppError::NoCandidates);
                return Ok(());
            }
        };
        self.record_event(
            "candidates_fetched",
            json!({ "count": pool.eligible_count() }),
        );

        {
            let mut state = self.state.lock();
            if self.is_stale(session) {
                return Ok(());
            }
            state.remaining_rerolls = self.reroll_budget;
            state.pool = Some(pool);
        }

        self.settle_next_pick(session).await
    }

    /// The "Roll Again" action. A no-op unless the engine is settled with
    /// budget remaining; if a detail lookup is still in flight the request
    /// queues on the transition guard until the engine settles.
    pub async fn request_reroll(&self) -> AppResult<()> {
        let session = self.epoch.load(Ordering::SeqCst);
        let _transition = self.transition.lock().await;
        {
            let state = self.state.lock();
            if self.is_stale(session) {
                debug!("reroll superseded by a newer session");
                return Ok(());
            }
            if state.phase != EnginePhase::Settled
                || state.remaining_rerolls == 0
                || state.pool.is_none()
            {
                debug!(
                    phase = ?state.phase,
                    remaining = state.remaining_rerolls,
                    "reroll ignored"
                );
                return Ok(());
            }
        }
        self.settle_next_pick(session).await
    }

    pub fn snapshot(&self) -> DiscoverySnapshot {
        let state = self.state.lock();
        let current = match (&state.current_detail, &state.current_pick) {
            (Some(detail), _) => Some(DisplayableVenue::from_detail(detail)),
            (None, Some(base)) => Some(DisplayableVenue::from_base(base)),
            (None, None) => None,
        };
        DiscoverySnapshot {
            phase: state.phase,
            current,
            remaining_rerolls: state.remaining_rerolls,
            history: state.history.entries().to_vec(),
            last_error: state.last_error.clone(),
        }
    }

    /// One pick cycle: draw, commit the draw (exclude + history), resolve
    /// detail, settle. The draw is committed before the detail call so the
    /// venue is burned even when enrichment fails.
    async fn settle_next_pick(&self, session: u64) -> AppResult<()> {
        let mut exhausted = false;
        let picked = {
            let mut state = self.state.lock();
            if self.is_stale(session) {
                return Ok(());
            }
            let Some(pool) = state.pool.as_mut() else {
                return Ok(());
            };
            let draw = {
                let mut rng = self.rng.lock();
                pool.pick_random(&mut *rng)
            };
            match draw {
                Ok(venue) => {
                    pool.exclude(&venue.id);
                    let eligible_after = pool.eligible_count();
                    state.history.record(venue.clone());
                    state.current_pick = Some(venue.clone());
                    state.current_detail = None;
                    state.phase = EnginePhase::ResolvingDetail;
                    Some((venue, eligible_after))
                }
                Err(AppError::NoEligibleCandidates) => {
                    // Pool exhausted: keep the last settled result on display,
                    // just take away the reroll affordance.
                    state.remaining_rerolls = 0;
                    state.phase = EnginePhase::Settled;
                    exhausted = true;
                    None
                }
                Err(err) => return Err(err),
            }
        };
        if exhausted {
            self.record_event("rerolls_exhausted", json!({ "session": session }));
            return Ok(());
        }
        let Some((venue, eligible_after)) = picked else {
            return Ok(());
        };

        let detail = self
            .venues
            .details(&venue.id)
            .await
            .map_err(|err| AppError::detail_lookup(venue.id.clone(), err));

        let remaining = {
            let mut state = self.state.lock();
            if self.is_stale(session) {
                debug!(venue_id = %venue.id, "dropping settled pick from a stale session");
                return Ok(());
            }
            // Never advertise more rerolls than there are unseen candidates.
            let remaining = state
                .remaining_rerolls
                .saturating_sub(1)
                .min(eligible_after as u32);
            state.remaining_rerolls = remaining;
            match detail {
                Ok(detail) => {
                    state.current_detail = Some(detail);
                }
                Err(err) => {
                    // Degraded display beats no display; this never blocks the
                    // settle.
                    warn!(?err, venue_id = %venue.id, "detail lookup failed; showing base venue");
                    state.current_detail = None;
                }
            }
            state.phase = EnginePhase::Settled;
            remaining
        };

        let degraded = {
            let state = self.state.lock();
            state.current_detail.is_none()
        };
        if degraded {
            self.record_event("detail_fallback", json!({ "venue_id": venue.id }));
        }
        self.record_event(
            "pick_settled",
            json!({
                "venue_id": venue.id,
                "remaining_rerolls": remaining,
                "degraded": degraded,
            }),
        );
        Ok(())
    }

    fn is_stale(&self, session: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != session
    }

    fn enter_phase(&self, session: u64, phase: EnginePhase) -> bool {
        let mut state = self.state.lock();
        if self.is_stale(session) {
            return false;
        }
        state.phase = phase;
        true
    }

    fn fail_session(&self, session: u64, phase: EnginePhase, err: &AppError) {
        let mut state = self.state.lock();
        if self.is_stale(session) {
            return;
        }
        *state = SessionState {
            phase,
            last_error: Some(err.to_string()),
            ..SessionState::default()
        };
    }

    fn record_event(&self, name: &str, payload: serde_json::Value) {
        if let Err(err) = self.telemetry.record(name, payload) {
            warn!(?err, name, "failed to record telemetry event");
        }
    }
}
