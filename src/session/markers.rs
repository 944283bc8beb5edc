//! Page markers for the remote surface, grouped by purpose.

use crate::models::TargetKind;

use super::surface::Marker;

pub fn action_button(kind: TargetKind) -> Marker {
    match kind {
        TargetKind::Standard => Marker::css(".my-button.btn_spin"),
        TargetKind::Special => Marker::css(".btn_spin .my-button"),
    }
}

pub fn balance(kind: TargetKind) -> Marker {
    match kind {
        TargetKind::Standard => Marker::css(".balance-bg.hand_balance .text2"),
        TargetKind::Special => Marker::css(".h-balance.hand_balance .text2"),
    }
}

/// Visible only while inside a target.
pub fn in_target_indicators() -> Vec<Marker> {
    vec![
        Marker::css(".my-button.btn_spin"),
        Marker::css(".balance-bg.hand_balance"),
        Marker::css(".h-balance.hand_balance"),
    ]
}

/// Cards in the neutral lobby grid; the `title` attribute carries the title code.
pub fn lobby_card() -> Marker {
    Marker::id("grid_gm_item")
}

pub fn join_button() -> Marker {
    Marker::xpath("//div[contains(@class, 'gm-info-box')]//span[normalize-space(text())='Join']")
}

/// Cash-out control candidates, most specific first.
pub fn cashout_candidates() -> Vec<Marker> {
    vec![
        Marker::css(".handle-main .my-button.btn_cashout"),
        Marker::css(".handle-main .my-button--normal.btn_cashout"),
        Marker::css(".handle-main .btn_cashout"),
        Marker::css(".handle-main div[class*='btn_cashout']"),
        Marker::css(".my-button.btn_cashout"),
        Marker::css(".btn_cashout"),
        Marker::css("div[class*='btn_cashout']"),
        Marker::css("button[class*='cashout']"),
        Marker::xpath("//div[contains(@class, 'my-button') and contains(@class, 'btn_cashout')]"),
        Marker::xpath("//button[contains(text(), 'Cashout')]"),
        Marker::xpath("//span[contains(text(), 'Cashout')]"),
    ]
}

pub fn exit_button() -> Marker {
    Marker::css(".function-btn .reserve-btn-gray")
}

pub fn confirm_button() -> Marker {
    Marker::xpath("//button[.//div[normalize-space(text())='Confirm']]")
}

pub fn collect_button() -> Marker {
    Marker::css(".my-button.btn_take")
}

/// On-screen position label such as `5,32`.
pub fn position(label: &str) -> Marker {
    Marker::xpath(format!("//span[normalize-space(text())='{label}']"))
}

/// Digits only; separators and currency symbols are dropped.
pub fn parse_balance(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_selects_controls() {
        assert_ne!(action_button(TargetKind::Standard), action_button(TargetKind::Special));
        assert_eq!(balance(TargetKind::Special).value, ".h-balance.hand_balance .text2");
        assert_eq!(position("5,32").value, "//span[normalize-space(text())='5,32']");
    }

    #[test]
    fn balance_text_is_tolerant() {
        assert_eq!(parse_balance("12,345"), Some(12345));
        assert_eq!(parse_balance(" $ 20 000 "), Some(20000));
        assert_eq!(parse_balance("--"), None);
        assert_eq!(parse_balance(""), None);
    }
}
