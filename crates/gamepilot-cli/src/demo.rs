//! `gamepilot demo` – the Home → Shop scenario against a simulated client.
//!
//! Home and Shop each carry a distinct badge; the shop icon leads from one
//! to the other.  With `popup` the shop opens under a promotional overlay
//! that only `closePopup` removes, so the run exercises recovery.

use std::sync::Arc;
use std::time::Duration;

use gamepilot_hal::{BadgePattern, SimClient, SimEffect, badge_screen};
use gamepilot_kernel::{StateDef, StateGraphBuilder};
use gamepilot_middleware::DiagnosticsBus;
use gamepilot_perception::{Recognizer, Template, TemplateRegistry};
use gamepilot_runtime::{Navigator, RecoveryConfig, Session, StateEstimator};
use gamepilot_types::{ActionRecipe, Frame, MatchMethod, PilotError, Region, TemplateKey};

use crate::config::Config;

const WIDTH: u32 = 160;
const HEIGHT: u32 = 96;
const BADGE: Region = Region {
    x: 60,
    y: 24,
    width: 40,
    height: 40,
};
const CROP: Region = Region {
    x: 64,
    y: 28,
    width: 32,
    height: 32,
};

pub struct Demo {
    pub navigator: Navigator,
    pub client: SimClient,
    pub bus: DiagnosticsBus,
}

fn home_screen() -> Frame {
    badge_screen(WIDTH, HEIGHT, BADGE, BadgePattern::VerticalStripes, [90, 180, 240])
}

fn shop_screen() -> Frame {
    badge_screen(WIDTH, HEIGHT, BADGE, BadgePattern::Checker, [240, 190, 60])
}

fn popup_screen() -> Frame {
    let banner = Region::new(20, 10, 120, 76);
    badge_screen(WIDTH, HEIGHT, banner, BadgePattern::Diagonal, [220, 60, 80])
}

fn tap(name: &str, x: u32, y: u32) -> ActionRecipe {
    ActionRecipe::tap(name, x, y).with_expected_duration(Duration::from_millis(200))
}

/// Assemble the model, the simulated client and a navigator publishing to a
/// fresh diagnostics bus.
pub fn build(popup: bool, cfg: &Config) -> Result<Demo, PilotError> {
    let home_key = TemplateKey::new("home", "badge");
    let shop_key = TemplateKey::new("shop", "badge");

    let mut registry = TemplateRegistry::new();
    registry.register(Template::from_frame_region(
        home_key.clone(),
        &home_screen(),
        CROP,
        MatchMethod::Exact,
        0.9,
    )?)?;
    registry.register(Template::from_frame_region(
        shop_key.clone(),
        &shop_screen(),
        CROP,
        MatchMethod::Exact,
        0.9,
    )?)?;

    let graph = StateGraphBuilder::new("home")
        .state(StateDef::new("home").with_signature(home_key))
        .state(StateDef::new("shop").with_signature(shop_key))
        .weighted_transition("home", "shop", tap("tapShopIcon", 80, 80), 1, Duration::from_secs(2))
        .weighted_transition("shop", "home", tap("tapReturnHome", 8, 8), 1, Duration::from_secs(2))
        .build(&registry)?;

    let mut shop = SimEffect::goto("shop").after_captures(1);
    if popup {
        shop = shop.with_overlay(popup_screen());
    }
    let client = SimClient::builder()
        .screen("home", home_screen())
        .screen("shop", shop_screen())
        .start_at("home")
        .route_effect("home", "tapShopIcon", shop)
        .route("shop", "tapReturnHome", "home")
        .dismiss_with("closePopup")
        .global_route("tapHomeButton", SimEffect::goto("home"))
        .build()?;

    let registry = Arc::new(registry);
    let bus = DiagnosticsBus::default();
    let estimator = StateEstimator::new(Arc::new(graph), Recognizer::new(registry), cfg.estimator());
    let session = Session::new(estimator, Box::new(client.clone()), Box::new(client.clone()))
        .with_sink(Arc::new(bus.clone()));
    let recovery = cfg.recovery(RecoveryConfig {
        dismiss: vec![tap("closePopup", 150, 6)],
        anchor_return: vec![tap("tapHomeButton", 8, 88)],
        ..RecoveryConfig::default()
    });
    let navigator = Navigator::new(session, cfg.navigator(), recovery);

    Ok(Demo {
        navigator,
        client,
        bus,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamepilot_middleware::Topic;
    use gamepilot_types::{RecoveryTier, TierOutcome, TrailEntry};
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn plain_run_reaches_shop() {
        let mut demo = build(false, &Config::default()).unwrap();
        let report = demo
            .navigator
            .navigate_to(&"shop".into(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.final_belief.is(&"shop".into()));
        assert_eq!(demo.client.executed(), vec!["tapShopIcon"]);
    }

    #[tokio::test(start_paused = true)]
    async fn popup_run_recovers_and_publishes() {
        let mut demo = build(true, &Config::default()).unwrap();
        let mut recovery_rx = demo.bus.subscribe_to(Topic::Recovery);

        let report = demo
            .navigator
            .navigate_to(&"shop".into(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.final_belief.is(&"shop".into()));
        assert_eq!(
            report.trail.recovery_attempts().last(),
            Some(&(RecoveryTier::Dismiss, TierOutcome::Resolved))
        );
        let first = recovery_rx.recv().await.unwrap();
        assert!(matches!(first.payload, TrailEntry::Anomaly { .. }));
    }
}
