//! Preference commands.

use anyhow::{Result, anyhow, bail};
use storefront_inbox::model::{
    Category, CategoryTogglesPatch, DeliveryFrequency, DeliveryMethodsPatch, PreferenceSet,
    PreferencesPatch, QuietHours,
};
use storefront_inbox::PreferencesGate;

use super::{Ctx, print_json};

pub async fn show(ctx: &Ctx) -> Result<()> {
    let prefs = ctx.api.preferences().await?;
    print_prefs(ctx, &prefs)
}

/// Send `patch`. The gate only adopts what the server returns.
pub async fn set(ctx: &Ctx, patch: &PreferencesPatch) -> Result<()> {
    if patch.is_empty() {
        bail!("Nothing to change. Pass --category, --delivery, --frequency or --quiet-hours.");
    }
    let gate = PreferencesGate::new(ctx.api.clone());
    let prefs = gate.update(patch).await?;
    if !ctx.json {
        println!("Preferences updated.");
    }
    print_prefs(ctx, &prefs)
}

/// Build a patch from command-line flags.
pub fn build_patch(
    categories: &[String],
    delivery: &[String],
    frequency: Option<&str>,
    quiet_hours: Option<&str>,
) -> Result<PreferencesPatch> {
    let mut patch = PreferencesPatch::default();

    if !categories.is_empty() {
        let mut toggles = CategoryTogglesPatch::default();
        for arg in categories {
            let (name, on) = toggle(arg)?;
            let category =
                Category::parse(name).ok_or_else(|| anyhow!("Unknown category: {name}"))?;
            toggles.set(category, on);
        }
        patch.categories = Some(toggles);
    }

    if !delivery.is_empty() {
        let mut methods = DeliveryMethodsPatch::default();
        for arg in delivery {
            let (name, on) = toggle(arg)?;
            match name.to_ascii_lowercase().replace('_', "-").as_str() {
                "in-app" | "inapp" => methods.in_app = Some(on),
                "email" => methods.email = Some(on),
                "push" => methods.push = Some(on),
                _ => bail!("Unknown delivery method: {name}"),
            }
        }
        patch.delivery = Some(methods);
    }

    if let Some(f) = frequency {
        patch.frequency =
            Some(DeliveryFrequency::parse(f).ok_or_else(|| anyhow!("Unknown frequency: {f}"))?);
    }

    if let Some(q) = quiet_hours {
        patch.quiet_hours = Some(parse_quiet_hours(q)?);
    }

    Ok(patch)
}

/// `name=true|false|on|off`.
fn toggle(arg: &str) -> Result<(&str, bool)> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected name=bool, got {arg:?}"))?;
    let on = match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => true,
        "false" | "off" | "no" | "0" => false,
        other => bail!("Expected true/false for {name}, got {other:?}"),
    };
    Ok((name.trim(), on))
}

fn parse_quiet_hours(arg: &str) -> Result<QuietHours> {
    if arg.trim().eq_ignore_ascii_case("off") {
        return Ok(QuietHours {
            enabled: false,
            ..Default::default()
        });
    }
    let (start, end) = arg
        .split_once('-')
        .ok_or_else(|| anyhow!("Expected HH:MM-HH:MM or off, got {arg:?}"))?;
    for t in [start, end] {
        chrono::NaiveTime::parse_from_str(t.trim(), "%H:%M")
            .map_err(|_| anyhow!("Invalid time {t:?}; expected HH:MM"))?;
    }
    Ok(QuietHours {
        enabled: true,
        start: start.trim().to_string(),
        end: end.trim().to_string(),
    })
}

fn print_prefs(ctx: &Ctx, prefs: &PreferenceSet) -> Result<()> {
    if ctx.json {
        return print_json(prefs);
    }
    let on = |b: bool| if b { "on" } else { "off" };
    println!("Categories:");
    for c in Category::ALL {
        println!("  {:<13} {}", c.as_str(), on(prefs.category_enabled(c)));
    }
    println!("Delivery:");
    println!("  {:<13} {}", "in-app", on(prefs.delivery.in_app));
    println!("  {:<13} {}", "email", on(prefs.delivery.email));
    println!("  {:<13} {}", "push", on(prefs.delivery.push));
    let q = &prefs.quiet_hours;
    if q.enabled {
        println!("Quiet hours:   {}-{}", q.start, q.end);
    } else {
        println!("Quiet hours:   off");
    }
    println!("Frequency:     {:?}", prefs.frequency);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn patch_from_flags() {
        let patch = build_patch(
            &strings(&["promotion=false", "order_update=on"]),
            &strings(&["email=off"]),
            Some("daily"),
            Some("22:30-07:00"),
        )
        .unwrap();

        let cats = patch.categories.unwrap();
        assert_eq!(cats.promotions, Some(false));
        assert_eq!(cats.order_updates, Some(true));
        assert_eq!(cats.payments, None);
        assert_eq!(patch.delivery.unwrap().email, Some(false));
        assert_eq!(patch.frequency, Some(DeliveryFrequency::Daily));
        let q = patch.quiet_hours.unwrap();
        assert!(q.enabled);
        assert_eq!((q.start.as_str(), q.end.as_str()), ("22:30", "07:00"));
    }

    #[test]
    fn no_flags_is_empty_patch() {
        assert!(build_patch(&[], &[], None, None).unwrap().is_empty());
    }

    #[test]
    fn bad_flags_are_rejected() {
        assert!(build_patch(&strings(&["newsletter=false"]), &[], None, None).is_err());
        assert!(build_patch(&strings(&["payment"]), &[], None, None).is_err());
        assert!(build_patch(&strings(&["payment=maybe"]), &[], None, None).is_err());
        assert!(build_patch(&[], &strings(&["sms=on"]), None, None).is_err());
        assert!(build_patch(&[], &[], Some("monthly"), None).is_err());
        assert!(build_patch(&[], &[], None, Some("25:00-07:00")).is_err());
    }

    #[test]
    fn quiet_hours_off() {
        let patch = build_patch(&[], &[], None, Some("off")).unwrap();
        assert!(!patch.quiet_hours.unwrap().enabled);
    }
}
