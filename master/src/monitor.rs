use crate::state::AppState;
use crate::{MONITOR_INTERVAL, RESERVATION_TTL, TRACKER_DEAD_TIMEOUT};
use std::time::SystemTime;
use tracing::{debug, info};

/// Barrido periódico: trackers sin heartbeat, jobs que ya no tienen nada
/// pendiente y reservas de ids abandonadas.
pub async fn monitor_trackers(state: AppState) {
    loop {
        tokio::time::sleep(MONITOR_INTERVAL).await;
        let now = SystemTime::now();

        let (dead, finished, expired) = {
            let mut tracker = state.lock();
            let dead = tracker.sweep_dead_trackers(now, TRACKER_DEAD_TIMEOUT);
            let finished = tracker.finish_idle_jobs();
            let expired = tracker.expire_reservations(now, RESERVATION_TTL);
            (dead, finished, expired)
        };

        if !dead.is_empty() {
            info!("{} trackers perdidos en este barrido", dead.len());
        }
        if !finished.is_empty() {
            info!("jobs cerrados por el monitor: {:?}", finished);
        }
        if expired > 0 {
            debug!("{} reservas de id vencidas", expired);
        }
    }
}
