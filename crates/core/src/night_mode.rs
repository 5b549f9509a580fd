//! Night-mode signal: time-of-day or GPIO polarity, exposed as a
//! `tokio::sync::watch` receiver of the latest "is it night" boolean —
//! the pattern this codebase uses for "latest value, notify on change"
//! signals elsewhere. Only transitions are ever sent; the watch channel's
//! own "changed" bookkeeping is deliberately not relied on for that
//! (a re-send of the same value would still mark a receiver as having a
//! pending change), so each poller compares against the currently held
//! value itself before sending.

use std::time::Duration;

use log::{info, warn};
use tokio::sync::watch;

/// Whether `now` (as an `HH:mm` pair) falls in the night interval, given
/// `day_start`/`night_start` also as `HH:mm` pairs. Handles both the normal
/// case (night wraps midnight, `night_start > day_start`) and the inverted
/// case (`night_start < day_start`, e.g. an indoor test rig where "night"
/// is the shorter, non-wrapping interval) by treating night as the
/// complement of the day interval.
pub fn is_night_at(now: (u8, u8), day_start: (u8, u8), night_start: (u8, u8)) -> bool {
    let to_minutes = |(h, m): (u8, u8)| h as i32 * 60 + m as i32;
    let now_m = to_minutes(now);
    let day_m = to_minutes(day_start);
    let night_m = to_minutes(night_start);

    if night_m > day_m {
        !(now_m >= day_m && now_m < night_m)
    } else {
        now_m >= night_m && now_m < day_m
    }
}

fn current_hh_mm() -> (u8, u8) {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    (now.hour(), now.minute())
}

/// Spawns the time-based provider; polls the wall clock every 60s. `day_start`
/// and `night_start` are pre-parsed `HH:mm` pairs — malformed strings are
/// rejected during `Config` validation, never here.
pub fn spawn_time_based(day_start: (u8, u8), night_start: (u8, u8)) -> watch::Receiver<bool> {
    let initial = is_night_at(current_hh_mm(), day_start, night_start);
    let (tx, rx) = watch::channel(initial);
    info!("time-based night mode starting, initial={}", if initial { "NIGHT" } else { "DAY" });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let night = is_night_at(current_hh_mm(), day_start, night_start);
            if night != *tx.borrow() {
                info!("night mode changed to {}", if night { "NIGHT" } else { "DAY" });
                if tx.send(night).is_err() {
                    return;
                }
            }
        }
    });

    rx
}

fn gpio_state(pin_high: bool, active_high: bool) -> bool {
    if active_high {
        pin_high
    } else {
        !pin_high
    }
}

async fn read_gpio_pin(pin: u32) -> Option<bool> {
    let path = format!("/sys/class/gpio/gpio{pin}/value");
    tokio::task::spawn_blocking(move || std::fs::read_to_string(&path))
        .await
        .expect("blocking GPIO read task panicked")
        .ok()
        .map(|val| val.trim() == "1")
}

/// Spawns the GPIO-based provider; polls `/sys/class/gpio/gpio<pin>/value`
/// every 1s via `spawn_blocking` (sysfs reads are plain synchronous file
/// I/O, not meaningfully async).
pub fn spawn_gpio_based(pin: u32, active_high: bool) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    info!("GPIO-based night mode starting, pin={pin} active_high={active_high}");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut initialized = false;
        loop {
            ticker.tick().await;
            let Some(pin_high) = read_gpio_pin(pin).await else {
                warn!("cannot read GPIO {pin}, leaving night mode unchanged");
                continue;
            };
            let night = gpio_state(pin_high, active_high);
            if !initialized || night != *tx.borrow() {
                initialized = true;
                info!("GPIO {pin} -> {}", if night { "NIGHT" } else { "DAY" });
                if tx.send(night).is_err() {
                    return;
                }
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_range_day_is_between_starts() {
        let day = (7, 0);
        let night = (19, 0);
        assert!(!is_night_at((12, 0), day, night));
        assert!(is_night_at((20, 0), day, night));
        assert!(is_night_at((3, 0), day, night));
    }

    #[test]
    fn inverted_range_night_is_the_short_interval() {
        let day = (10, 0);
        let night = (2, 0);
        assert!(is_night_at((3, 0), day, night));
        assert!(!is_night_at((11, 0), day, night));
        assert!(!is_night_at((1, 0), day, night));
    }

    #[test]
    fn gpio_polarity_flips_with_active_high() {
        assert!(gpio_state(true, true));
        assert!(!gpio_state(true, false));
        assert!(!gpio_state(false, true));
        assert!(gpio_state(false, false));
    }

    #[tokio::test]
    async fn time_based_provider_reflects_initial_state() {
        let rx = spawn_time_based((0, 0), (0, 1));
        // day interval 00:00..00:01 is a one-minute sliver; virtually
        // always "night" at test run time, but what we're really checking
        // is that the provider starts up and produces *some* value without
        // panicking before the first 60s tick ever fires.
        let _ = *rx.borrow();
    }
}
