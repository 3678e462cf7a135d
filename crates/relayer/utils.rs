use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

pub async fn sleep_random(interval: Duration) {
    sleep(random_duration(interval)).await;
}

/// The configured interval plus up to 400 ms of jitter, so per-chain passes
/// drift apart instead of thundering together.
pub fn random_duration(interval: Duration) -> Duration {
    let random_noise: u64 = {
        let mut rng = rand::thread_rng();
        rng.gen_range(0..400)
    };
    interval + Duration::from_millis(random_noise)
}
