// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Closed set of administrative commands.
//!
//! The admin endpoint accepts one JSON object with an `action` tag and a
//! flat payload. Parsing is two-step: the tag is read first so an
//! unrecognized action can be reported by name, then the body is
//! deserialized into the typed variant.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{Error, Result};

/// One administrative command.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdminAction {
    /// Approve a pending driver application.
    ApproveDriver {
        /// Driver profile id.
        user_id: String,
    },
    /// Reject a pending driver application.
    RejectDriver {
        /// Driver profile id.
        user_id: String,
        /// Rejection reason shown to the applicant.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Approve a pending merchant application.
    ApproveMerchant {
        /// Merchant profile id.
        user_id: String,
    },
    /// Reject a pending merchant application.
    RejectMerchant {
        /// Merchant profile id.
        user_id: String,
        /// Rejection reason shown to the applicant.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Suspend an account.
    SuspendUser {
        /// Profile id.
        user_id: String,
    },
    /// Lift an account suspension.
    UnsuspendUser {
        /// Profile id.
        user_id: String,
    },
    /// Delete an account. Admin profiles cannot be deleted.
    DeleteUser {
        /// Profile id.
        user_id: String,
    },
    /// Force a user's online flag.
    SetOnlineStatus {
        /// Profile id.
        user_id: String,
        /// New online state.
        is_online: bool,
    },
    /// Partially edit a profile; omitted fields are left untouched.
    EditProfile {
        /// Profile id.
        user_id: String,
        /// New contact email.
        #[serde(default)]
        email: Option<String>,
        /// New display name.
        #[serde(default)]
        display_name: Option<String>,
        /// New contact phone.
        #[serde(default)]
        phone: Option<String>,
        /// New vehicle type (drivers).
        #[serde(default)]
        vehicle_type: Option<String>,
    },
    /// Create an account administratively.
    AddUser {
        /// Identity id for the new account.
        user_id: String,
        /// Role: customer, driver, merchant or admin.
        role: String,
        /// Contact email.
        #[serde(default)]
        email: Option<String>,
        /// Display name.
        #[serde(default)]
        display_name: Option<String>,
        /// Contact phone.
        #[serde(default)]
        phone: Option<String>,
    },
    /// Approve a pending account-deletion request; removes the profile.
    ApproveAccountDeletion {
        /// Profile id.
        user_id: String,
    },
    /// Decline a pending account-deletion request.
    RejectAccountDeletion {
        /// Profile id.
        user_id: String,
    },
    /// List account emails, optionally filtered by role.
    GetUserEmails {
        /// Role filter; all roles when omitted.
        #[serde(default)]
        role: Option<String>,
    },

    /// Mark a withdrawal request completed. The payout itself happens
    /// outside the platform; no wallet money moves.
    ApproveWithdrawal {
        /// Request id.
        request_id: String,
        /// Note stored on the request.
        #[serde(default)]
        note: Option<String>,
    },
    /// Reject a withdrawal request and refund the held amount.
    RejectWithdrawal {
        /// Request id.
        request_id: String,
        /// Rejection reason, stored as the admin note.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Approve a topup request and credit the requester's wallet.
    ApproveTopup {
        /// Request id.
        request_id: String,
        /// Note stored on the request.
        #[serde(default)]
        note: Option<String>,
    },
    /// Reject a topup request.
    RejectTopup {
        /// Request id.
        request_id: String,
        /// Rejection reason, stored as the admin note.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Apply a signed adjustment to an account's wallet.
    AdjustWallet {
        /// Account whose wallet is adjusted.
        account_id: String,
        /// Signed amount.
        amount: Decimal,
        /// Audit description for the ledger entry.
        #[serde(default)]
        description: Option<String>,
        /// Replay-protection key; a repeated key is a no-op.
        #[serde(default)]
        idempotency_key: Option<String>,
    },
    /// Credit a wallet outside the topup-request flow.
    ManualTopup {
        /// Account whose wallet is credited.
        account_id: String,
        /// Amount, must be positive.
        amount: Decimal,
        /// Audit description for the ledger entry.
        #[serde(default)]
        description: Option<String>,
        /// Replay-protection key; a repeated key is a no-op.
        #[serde(default)]
        idempotency_key: Option<String>,
    },

    /// Assign a driver to an order.
    AssignOrder {
        /// Booking id.
        booking_id: String,
        /// Driver to assign.
        driver_id: String,
    },
    /// Move an order to a different driver and notify all parties.
    ReassignOrder {
        /// Booking id.
        booking_id: String,
        /// New driver; must differ from the current one.
        driver_id: String,
        /// Vehicle type override.
        #[serde(default)]
        vehicle_type: Option<String>,
        /// Price override.
        #[serde(default)]
        price: Option<Decimal>,
    },
    /// Cancel an order.
    CancelOrder {
        /// Booking id.
        booking_id: String,
        /// Cancellation reason.
        reason: String,
    },
    /// Cancel an order with an optional refund of its price.
    ForceCancelOrder {
        /// Booking id.
        booking_id: String,
        /// Cancellation reason.
        reason: String,
        /// Refund the booking price to the customer wallet.
        #[serde(default)]
        refund: bool,
        /// Replay-protection key for the refund.
        #[serde(default)]
        idempotency_key: Option<String>,
    },
    /// Clear the assignment and reopen the order for dispatch.
    RebroadcastOrder {
        /// Booking id.
        booking_id: String,
    },

    /// Create or overwrite a system configuration value.
    UpsertSystemConfig {
        /// Configuration key.
        key: String,
        /// Configuration value.
        value: serde_json::Value,
    },
    /// Update a support ticket.
    UpdateTicketStatus {
        /// Ticket id.
        ticket_id: String,
        /// New status.
        status: String,
        /// Resolution text.
        #[serde(default)]
        resolution: Option<String>,
    },

    /// Create a coupon.
    CreateCoupon {
        /// Coupon id.
        coupon_id: String,
        /// Coupon payload.
        data: serde_json::Value,
    },
    /// Update an existing coupon.
    UpdateCoupon {
        /// Coupon id.
        coupon_id: String,
        /// Coupon payload.
        data: serde_json::Value,
    },
    /// Delete a coupon.
    DeleteCoupon {
        /// Coupon id.
        coupon_id: String,
    },
    /// Create a menu item for a merchant.
    CreateMenuItem {
        /// Item id.
        item_id: String,
        /// Owning merchant.
        merchant_id: String,
        /// Item payload.
        data: serde_json::Value,
    },
    /// Update an existing menu item.
    UpdateMenuItem {
        /// Item id.
        item_id: String,
        /// Item payload.
        data: serde_json::Value,
    },
    /// Delete a menu item.
    DeleteMenuItem {
        /// Item id.
        item_id: String,
    },
    /// Create a menu option.
    CreateMenuOption {
        /// Option id.
        option_id: String,
        /// Option payload.
        data: serde_json::Value,
    },
    /// Update an existing menu option.
    UpdateMenuOption {
        /// Option id.
        option_id: String,
        /// Option payload.
        data: serde_json::Value,
    },
    /// Delete a menu option.
    DeleteMenuOption {
        /// Option id.
        option_id: String,
    },
    /// Create an option group.
    CreateOptionGroup {
        /// Group id.
        group_id: String,
        /// Group payload.
        data: serde_json::Value,
    },
    /// Update an existing option group.
    UpdateOptionGroup {
        /// Group id.
        group_id: String,
        /// Group payload.
        data: serde_json::Value,
    },
    /// Delete an option group, detaching its options and item links first.
    DeleteOptionGroup {
        /// Group id.
        group_id: String,
    },
    /// Create or remove an item <-> option-group link.
    LinkOptionGroup {
        /// Menu item id.
        item_id: String,
        /// Option group id.
        group_id: String,
        /// True to link, false to unlink.
        linked: bool,
    },
    /// Create a banner.
    CreateBanner {
        /// Banner id.
        banner_id: String,
        /// Banner payload.
        data: serde_json::Value,
    },
    /// Update an existing banner.
    UpdateBanner {
        /// Banner id.
        banner_id: String,
        /// Banner payload.
        data: serde_json::Value,
    },
    /// Delete a banner.
    DeleteBanner {
        /// Banner id.
        banner_id: String,
    },
}

/// Parse a request body into a typed command.
///
/// The `action` tag is extracted up front so an unknown action fails
/// with its name instead of an opaque enum error; a known action with a
/// malformed payload reports the payload problem.
pub fn parse_action(body: serde_json::Value) -> Result<AdminAction> {
    let name = body
        .get("action")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Validation("missing 'action' field".to_string()))?
        .to_string();

    match serde_json::from_value::<AdminAction>(body) {
        Ok(action) => Ok(action),
        Err(e) if e.to_string().contains("unknown variant") => Err(Error::UnknownAction(name)),
        Err(e) => Err(Error::Validation(format!(
            "invalid payload for action '{name}': {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_action() {
        let action = parse_action(json!({
            "action": "approve_driver",
            "user_id": "drv-1",
        }))
        .unwrap();
        assert!(matches!(action, AdminAction::ApproveDriver { ref user_id } if user_id == "drv-1"));
    }

    #[test]
    fn test_parse_unknown_action_names_it() {
        let err = parse_action(json!({"action": "launch_rockets"})).unwrap_err();
        match err {
            Error::UnknownAction(name) => assert_eq!(name, "launch_rockets"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_missing_action_field() {
        let err = parse_action(json!({"user_id": "u-1"})).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_parse_malformed_payload_for_known_action() {
        let err = parse_action(json!({"action": "adjust_wallet", "account_id": "a-1"}))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_optional_fields_default() {
        let action = parse_action(json!({
            "action": "force_cancel_order",
            "booking_id": "bk-1",
            "reason": "ops request",
        }))
        .unwrap();
        match action {
            AdminAction::ForceCancelOrder {
                refund,
                idempotency_key,
                ..
            } => {
                assert!(!refund);
                assert!(idempotency_key.is_none());
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_decimal_amount_parses() {
        let action = parse_action(json!({
            "action": "manual_topup",
            "account_id": "a-1",
            "amount": "25.50",
        }))
        .unwrap();
        match action {
            AdminAction::ManualTopup { amount, .. } => {
                assert_eq!(amount, Decimal::new(2550, 2));
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }
}
