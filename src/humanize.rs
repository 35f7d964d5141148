//! Randomized pacing for typing, pointer motion and scrolling. Keeps the
//! bot's interaction rhythm inside human-looking bounds; makes no stronger
//! promise than that.

use rand::Rng;
use thirtyfour::prelude::*;
use thirtyfour::ElementRect;
use tokio::time::{sleep, Duration};
use tracing::debug;

/// Uniform ranges driving every randomized delay and distance.
#[derive(Debug, Clone)]
pub struct Pacing {
    pub key_delay_ms: (u64, u64),
    pub card_pause_ms: (u64, u64),
    pub scroll_distance_px: (i64, i64),
    pub scroll_pause_ms: (u64, u64),
    pub pointer_steps: (u32, u32),
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            key_delay_ms: (50, 150),
            card_pause_ms: (300, 1200),
            scroll_distance_px: (1500, 2500),
            scroll_pause_ms: (1500, 3000),
            pointer_steps: (5, 15),
        }
    }
}

fn jitter(range: (u64, u64)) -> u64 {
    rand::thread_rng().gen_range(range.0..=range.1)
}

/// Sleep for a random duration inside `range` (milliseconds).
pub async fn pause(range: (u64, u64)) {
    sleep(Duration::from_millis(jitter(range))).await;
}

/// Click into `element` and type `text` one character at a time with a
/// randomized inter-keystroke delay.
pub async fn type_like_human(
    element: &WebElement,
    text: &str,
    pacing: &Pacing,
) -> WebDriverResult<()> {
    element.click().await?;
    pause((50, 200)).await;
    for ch in text.chars() {
        element.send_keys(ch.to_string()).await?;
        pause(pacing.key_delay_ms).await;
    }
    Ok(())
}

/// Move the pointer to a random point inside `rect` along a short
/// multi-step path instead of a single jump.
pub async fn move_into(
    driver: &WebDriver,
    rect: &ElementRect,
    pacing: &Pacing,
) -> WebDriverResult<()> {
    let (start_x, start_y, target_x, target_y, steps) = {
        let mut rng = rand::thread_rng();
        let tx = rect.x + rng.gen_range(0.0..rect.width.max(1.0));
        let ty = rect.y + rng.gen_range(0.0..rect.height.max(1.0));
        let steps = rng.gen_range(pacing.pointer_steps.0..=pacing.pointer_steps.1);
        // drift in from a nearby offset rather than teleporting
        let sx = tx - rng.gen_range(40.0..120.0);
        let sy = ty - rng.gen_range(20.0..80.0);
        (sx, sy, tx, ty, steps)
    };

    let mut chain = driver.action_chain();
    for i in 1..=steps {
        let frac = f64::from(i) / f64::from(steps);
        let x = start_x + (target_x - start_x) * frac;
        let y = start_y + (target_y - start_y) * frac;
        chain = chain.move_to(x.max(0.0) as i64, y.max(0.0) as i64);
    }
    chain.perform().await?;
    debug!(x = target_x, y = target_y, steps, "pointer moved");
    Ok(())
}

/// Wheel the feed down by a randomized distance, then linger.
pub async fn scroll_feed(driver: &WebDriver, pacing: &Pacing) -> WebDriverResult<()> {
    let distance = {
        let mut rng = rand::thread_rng();
        rng.gen_range(pacing.scroll_distance_px.0..=pacing.scroll_distance_px.1)
    };
    driver
        .execute(&format!("window.scrollBy(0, {});", distance), vec![])
        .await?;
    pause(pacing.scroll_pause_ms).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_range() {
        for _ in 0..200 {
            let v = jitter((50, 150));
            assert!((50..=150).contains(&v));
        }
    }

    #[test]
    fn default_pacing_ranges_are_ordered() {
        let p = Pacing::default();
        assert!(p.key_delay_ms.0 <= p.key_delay_ms.1);
        assert!(p.card_pause_ms.0 <= p.card_pause_ms.1);
        assert!(p.scroll_distance_px.0 <= p.scroll_distance_px.1);
        assert!(p.scroll_pause_ms.0 <= p.scroll_pause_ms.1);
        assert!(p.pointer_steps.0 >= 1 && p.pointer_steps.0 <= p.pointer_steps.1);
    }

    #[tokio::test]
    async fn pause_is_bounded() {
        let start = std::time::Instant::now();
        pause((1, 5)).await;
        assert!(start.elapsed() < std::time::Duration::from_millis(500));
    }
}
