// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Admin operation handlers.
//!
//! One dispatcher over the closed command set. Every handler validates
//! its target before mutating, and the settlement paths express their
//! exactly-once guarantee through the store's guarded transition: zero
//! rows changed is reported as `already_processed`, never as an error.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::actions::AdminAction;
use crate::auth::CallerContext;
use crate::error::{Error, Result};
use crate::notify;
use crate::orders::OrderWorkflow;
use crate::store::{FinanceRequest, NewNotification, NewProfile, Profile, ProfileUpdate, Store};
use crate::wallet::WalletLedger;

/// Dispatcher over the admin command set.
pub struct AdminHandlers {
    store: Arc<dyn Store>,
    ledger: WalletLedger,
    orders: OrderWorkflow,
}

impl AdminHandlers {
    /// Create the dispatcher over the shared store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            ledger: WalletLedger::new(store.clone()),
            orders: OrderWorkflow::new(store.clone()),
            store,
        }
    }

    /// Execute one admin command on behalf of a verified caller.
    pub async fn dispatch(&self, ctx: &CallerContext, action: AdminAction) -> Result<Value> {
        info!(caller_id = %ctx.caller_id, action = ?action_name(&action), "Admin action");

        match action {
            // Accounts
            AdminAction::ApproveDriver { user_id } => {
                self.set_approval(&user_id, "driver", "approved", None).await
            }
            AdminAction::RejectDriver { user_id, reason } => {
                self.set_approval(&user_id, "driver", "rejected", reason.as_deref())
                    .await
            }
            AdminAction::ApproveMerchant { user_id } => {
                self.set_approval(&user_id, "merchant", "approved", None)
                    .await
            }
            AdminAction::RejectMerchant { user_id, reason } => {
                self.set_approval(&user_id, "merchant", "rejected", reason.as_deref())
                    .await
            }
            AdminAction::SuspendUser { user_id } => {
                self.require_profile(&user_id).await?;
                self.store.set_suspended(&user_id, true).await?;
                Ok(json!({"success": true}))
            }
            AdminAction::UnsuspendUser { user_id } => {
                self.require_profile(&user_id).await?;
                self.store.set_suspended(&user_id, false).await?;
                Ok(json!({"success": true}))
            }
            AdminAction::DeleteUser { user_id } => {
                let profile = self.require_profile(&user_id).await?;
                if profile.role == "admin" {
                    return Err(Error::Forbidden(
                        "admin accounts cannot be deleted".to_string(),
                    ));
                }
                self.store.delete_profile(&user_id).await?;
                Ok(json!({"success": true}))
            }
            AdminAction::SetOnlineStatus { user_id, is_online } => {
                self.require_profile(&user_id).await?;
                self.store.set_online(&user_id, is_online).await?;
                Ok(json!({"success": true}))
            }
            AdminAction::EditProfile {
                user_id,
                email,
                display_name,
                phone,
                vehicle_type,
            } => {
                self.require_profile(&user_id).await?;
                self.store
                    .update_profile(
                        &user_id,
                        &ProfileUpdate {
                            email,
                            display_name,
                            phone,
                            vehicle_type,
                        },
                    )
                    .await?;
                Ok(json!({"success": true}))
            }
            AdminAction::AddUser {
                user_id,
                role,
                email,
                display_name,
                phone,
            } => {
                if !matches!(role.as_str(), "customer" | "driver" | "merchant" | "admin") {
                    return Err(Error::Validation(format!("unknown role '{role}'")));
                }
                if self.store.get_profile(&user_id).await?.is_some() {
                    return Err(Error::Validation(format!(
                        "user '{user_id}' already exists"
                    )));
                }
                self.store
                    .insert_profile(&NewProfile {
                        user_id,
                        role,
                        email,
                        display_name,
                        phone,
                    })
                    .await?;
                Ok(json!({"success": true}))
            }
            AdminAction::ApproveAccountDeletion { user_id } => {
                let profile = self.require_profile(&user_id).await?;
                if !profile.deletion_requested {
                    return Err(Error::Validation(format!(
                        "user '{user_id}' has no pending deletion request"
                    )));
                }
                self.store.delete_profile(&user_id).await?;
                Ok(json!({"success": true}))
            }
            AdminAction::RejectAccountDeletion { user_id } => {
                self.require_profile(&user_id).await?;
                self.store.set_deletion_requested(&user_id, false).await?;
                self.notify_user(
                    &user_id,
                    "Account deletion declined",
                    "Your account deletion request was declined. Contact support for details.",
                    "account_deletion",
                )
                .await;
                Ok(json!({"success": true}))
            }
            AdminAction::GetUserEmails { role } => {
                let emails = self.store.list_user_emails(role.as_deref()).await?;
                Ok(json!({"success": true, "emails": emails}))
            }

            // Finance
            AdminAction::ApproveWithdrawal { request_id, note } => {
                let (request, changed) = self
                    .settle(&request_id, "withdrawal", "completed", note.as_deref())
                    .await?;
                if changed {
                    self.notify_user(
                        &request.requester_id,
                        "Withdrawal approved",
                        &format!("Your withdrawal of {} has been approved.", request.amount),
                        "withdrawal",
                    )
                    .await;
                }
                Ok(json!({"success": true, "already_processed": !changed}))
            }
            AdminAction::RejectWithdrawal { request_id, reason } => {
                let (request, changed) = self
                    .settle(&request_id, "withdrawal", "rejected", reason.as_deref())
                    .await?;
                if changed {
                    // Refund the held amount; the guarded transition above is
                    // the single-fire gate, so no idempotency key is needed.
                    self.ledger
                        .adjust(
                            &request.requester_id,
                            request.amount,
                            "refund",
                            &format!("Refund for rejected withdrawal {request_id}"),
                            None,
                        )
                        .await?;
                    self.notify_user(
                        &request.requester_id,
                        "Withdrawal rejected",
                        &format!(
                            "Your withdrawal of {} was rejected and refunded to your wallet.",
                            request.amount
                        ),
                        "withdrawal",
                    )
                    .await;
                }
                Ok(json!({"success": true, "already_processed": !changed}))
            }
            AdminAction::ApproveTopup { request_id, note } => {
                let (request, changed) = self
                    .settle(&request_id, "topup", "completed", note.as_deref())
                    .await?;
                if changed {
                    self.ledger
                        .adjust(
                            &request.requester_id,
                            request.amount,
                            "topup",
                            &format!("Approved topup request {request_id}"),
                            None,
                        )
                        .await?;
                    self.notify_user(
                        &request.requester_id,
                        "Topup approved",
                        &format!("{} has been credited to your wallet.", request.amount),
                        "topup",
                    )
                    .await;
                }
                Ok(json!({"success": true, "already_processed": !changed}))
            }
            AdminAction::RejectTopup { request_id, reason } => {
                let (request, changed) = self
                    .settle(&request_id, "topup", "rejected", reason.as_deref())
                    .await?;
                if changed {
                    self.notify_user(
                        &request.requester_id,
                        "Topup rejected",
                        "Your topup request was rejected.",
                        "topup",
                    )
                    .await;
                }
                Ok(json!({"success": true, "already_processed": !changed}))
            }
            AdminAction::AdjustWallet {
                account_id,
                amount,
                description,
                idempotency_key,
            } => {
                self.require_profile(&account_id).await?;
                let outcome = self
                    .ledger
                    .adjust(
                        &account_id,
                        amount,
                        "admin_adjustment",
                        description.as_deref().unwrap_or("Admin adjustment"),
                        idempotency_key.as_deref(),
                    )
                    .await?;
                Ok(json!({
                    "success": true,
                    "already_processed": outcome.already_processed,
                    "new_balance": outcome.new_balance,
                }))
            }
            AdminAction::ManualTopup {
                account_id,
                amount,
                description,
                idempotency_key,
            } => {
                if amount <= Decimal::ZERO {
                    return Err(Error::Validation(
                        "topup amount must be positive".to_string(),
                    ));
                }
                self.require_profile(&account_id).await?;
                let outcome = self
                    .ledger
                    .adjust(
                        &account_id,
                        amount,
                        "topup",
                        description.as_deref().unwrap_or("Manual topup"),
                        idempotency_key.as_deref(),
                    )
                    .await?;
                Ok(json!({
                    "success": true,
                    "already_processed": outcome.already_processed,
                    "new_balance": outcome.new_balance,
                }))
            }

            // Orders
            AdminAction::AssignOrder {
                booking_id,
                driver_id,
            } => {
                self.orders.assign(&booking_id, &driver_id).await?;
                Ok(json!({"success": true}))
            }
            AdminAction::ReassignOrder {
                booking_id,
                driver_id,
                vehicle_type,
                price,
            } => {
                self.orders
                    .reassign(&booking_id, &driver_id, vehicle_type, price)
                    .await?;
                Ok(json!({"success": true}))
            }
            AdminAction::CancelOrder { booking_id, reason } => {
                self.orders.cancel(&booking_id, &reason).await?;
                Ok(json!({"success": true}))
            }
            AdminAction::ForceCancelOrder {
                booking_id,
                reason,
                refund,
                idempotency_key,
            } => {
                let outcome = self
                    .orders
                    .force_cancel(&booking_id, &reason, refund, idempotency_key.as_deref())
                    .await?;
                Ok(json!({
                    "success": true,
                    "refunded": outcome.refunded,
                    "refund_amount": outcome.refund_amount,
                }))
            }
            AdminAction::RebroadcastOrder { booking_id } => {
                let status = self.orders.rebroadcast(&booking_id).await?;
                Ok(json!({"success": true, "status": status}))
            }

            // Platform
            AdminAction::UpsertSystemConfig { key, value } => {
                self.store.upsert_system_config(&key, &value).await?;
                Ok(json!({"success": true}))
            }
            AdminAction::UpdateTicketStatus {
                ticket_id,
                status,
                resolution,
            } => {
                let changed = self
                    .store
                    .update_ticket(&ticket_id, &status, resolution.as_deref())
                    .await?;
                if !changed {
                    return Err(Error::NotFound {
                        entity: "ticket",
                        id: ticket_id,
                    });
                }
                Ok(json!({"success": true}))
            }

            // Catalog
            AdminAction::CreateCoupon { coupon_id, data } => {
                self.put_record("coupon", &coupon_id, None, &data).await
            }
            AdminAction::UpdateCoupon { coupon_id, data } => {
                self.update_record("coupon", &coupon_id, &data).await
            }
            AdminAction::DeleteCoupon { coupon_id } => {
                self.delete_record("coupon", &coupon_id).await
            }
            AdminAction::CreateMenuItem {
                item_id,
                merchant_id,
                data,
            } => {
                self.put_record("menu_item", &item_id, Some(&merchant_id), &data)
                    .await
            }
            AdminAction::UpdateMenuItem { item_id, data } => {
                self.update_record("menu_item", &item_id, &data).await
            }
            AdminAction::DeleteMenuItem { item_id } => {
                self.delete_record("menu_item", &item_id).await
            }
            AdminAction::CreateMenuOption { option_id, data } => {
                self.put_record("menu_option", &option_id, None, &data).await
            }
            AdminAction::UpdateMenuOption { option_id, data } => {
                self.update_record("menu_option", &option_id, &data).await
            }
            AdminAction::DeleteMenuOption { option_id } => {
                self.delete_record("menu_option", &option_id).await
            }
            AdminAction::CreateOptionGroup { group_id, data } => {
                self.put_record("option_group", &group_id, None, &data).await
            }
            AdminAction::UpdateOptionGroup { group_id, data } => {
                self.update_record("option_group", &group_id, &data).await
            }
            AdminAction::DeleteOptionGroup { group_id } => {
                let deleted = self.store.delete_option_group(&group_id).await?;
                if !deleted {
                    return Err(Error::NotFound {
                        entity: "option_group",
                        id: group_id,
                    });
                }
                Ok(json!({"success": true}))
            }
            AdminAction::LinkOptionGroup {
                item_id,
                group_id,
                linked,
            } => {
                self.store
                    .link_item_option_group(&item_id, &group_id, linked)
                    .await?;
                Ok(json!({"success": true}))
            }
            AdminAction::CreateBanner { banner_id, data } => {
                self.put_record("banner", &banner_id, None, &data).await
            }
            AdminAction::UpdateBanner { banner_id, data } => {
                self.update_record("banner", &banner_id, &data).await
            }
            AdminAction::DeleteBanner { banner_id } => {
                self.delete_record("banner", &banner_id).await
            }
        }
    }

    async fn require_profile(&self, user_id: &str) -> Result<Profile> {
        self.store
            .get_profile(user_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                entity: "profile",
                id: user_id.to_string(),
            })
    }

    async fn set_approval(
        &self,
        user_id: &str,
        expected_role: &str,
        status: &str,
        reason: Option<&str>,
    ) -> Result<Value> {
        let profile = self.require_profile(user_id).await?;
        if profile.role != expected_role {
            return Err(Error::Validation(format!(
                "user '{user_id}' has role '{}', expected '{expected_role}'",
                profile.role
            )));
        }

        self.store
            .set_approval_status(user_id, status, reason)
            .await?;

        let (title, body) = if status == "approved" {
            (
                "Account approved".to_string(),
                "Your account has been approved. You can start working now.".to_string(),
            )
        } else {
            (
                "Account rejected".to_string(),
                match reason {
                    Some(r) => format!("Your account application was rejected: {r}"),
                    None => "Your account application was rejected.".to_string(),
                },
            )
        };
        self.notify_user(user_id, &title, &body, "account_review").await;

        Ok(json!({"success": true}))
    }

    /// Guarded pending -> terminal transition for a finance request.
    async fn settle(
        &self,
        request_id: &str,
        expected_kind: &str,
        terminal_status: &str,
        admin_note: Option<&str>,
    ) -> Result<(FinanceRequest, bool)> {
        let request = self
            .store
            .get_finance_request(request_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                entity: "finance_request",
                id: request_id.to_string(),
            })?;

        if request.kind != expected_kind {
            return Err(Error::Validation(format!(
                "request '{request_id}' is a {}, not a {expected_kind}",
                request.kind
            )));
        }

        let changed = self
            .store
            .settle_finance_request(request_id, terminal_status, admin_note, Utc::now())
            .await?;

        if !changed {
            info!(request_id, terminal_status, "Finance request already settled");
        }

        Ok((request, changed))
    }

    async fn put_record(
        &self,
        kind: &str,
        record_id: &str,
        merchant_id: Option<&str>,
        data: &Value,
    ) -> Result<Value> {
        self.store
            .put_catalog_record(kind, record_id, merchant_id, data)
            .await?;
        Ok(json!({"success": true}))
    }

    async fn update_record(&self, kind: &'static str, record_id: &str, data: &Value) -> Result<Value> {
        if self.store.get_catalog_record(kind, record_id).await?.is_none() {
            return Err(Error::NotFound {
                entity: kind,
                id: record_id.to_string(),
            });
        }
        self.store
            .put_catalog_record(kind, record_id, None, data)
            .await?;
        Ok(json!({"success": true}))
    }

    async fn delete_record(&self, kind: &'static str, record_id: &str) -> Result<Value> {
        let deleted = self.store.delete_catalog_record(kind, record_id).await?;
        if !deleted {
            return Err(Error::NotFound {
                entity: kind,
                id: record_id.to_string(),
            });
        }
        Ok(json!({"success": true}))
    }

    async fn notify_user(&self, user_id: &str, title: &str, body: &str, kind: &str) {
        notify::fan_out(
            &self.store,
            vec![NewNotification {
                user_id: user_id.to_string(),
                title: title.to_string(),
                body: body.to_string(),
                kind: kind.to_string(),
                data: None,
            }],
        )
        .await;
    }
}

fn action_name(action: &AdminAction) -> &'static str {
    match action {
        AdminAction::ApproveDriver { .. } => "approve_driver",
        AdminAction::RejectDriver { .. } => "reject_driver",
        AdminAction::ApproveMerchant { .. } => "approve_merchant",
        AdminAction::RejectMerchant { .. } => "reject_merchant",
        AdminAction::SuspendUser { .. } => "suspend_user",
        AdminAction::UnsuspendUser { .. } => "unsuspend_user",
        AdminAction::DeleteUser { .. } => "delete_user",
        AdminAction::SetOnlineStatus { .. } => "set_online_status",
        AdminAction::EditProfile { .. } => "edit_profile",
        AdminAction::AddUser { .. } => "add_user",
        AdminAction::ApproveAccountDeletion { .. } => "approve_account_deletion",
        AdminAction::RejectAccountDeletion { .. } => "reject_account_deletion",
        AdminAction::GetUserEmails { .. } => "get_user_emails",
        AdminAction::ApproveWithdrawal { .. } => "approve_withdrawal",
        AdminAction::RejectWithdrawal { .. } => "reject_withdrawal",
        AdminAction::ApproveTopup { .. } => "approve_topup",
        AdminAction::RejectTopup { .. } => "reject_topup",
        AdminAction::AdjustWallet { .. } => "adjust_wallet",
        AdminAction::ManualTopup { .. } => "manual_topup",
        AdminAction::AssignOrder { .. } => "assign_order",
        AdminAction::ReassignOrder { .. } => "reassign_order",
        AdminAction::CancelOrder { .. } => "cancel_order",
        AdminAction::ForceCancelOrder { .. } => "force_cancel_order",
        AdminAction::RebroadcastOrder { .. } => "rebroadcast_order",
        AdminAction::UpsertSystemConfig { .. } => "upsert_system_config",
        AdminAction::UpdateTicketStatus { .. } => "update_ticket_status",
        AdminAction::CreateCoupon { .. } => "create_coupon",
        AdminAction::UpdateCoupon { .. } => "update_coupon",
        AdminAction::DeleteCoupon { .. } => "delete_coupon",
        AdminAction::CreateMenuItem { .. } => "create_menu_item",
        AdminAction::UpdateMenuItem { .. } => "update_menu_item",
        AdminAction::DeleteMenuItem { .. } => "delete_menu_item",
        AdminAction::CreateMenuOption { .. } => "create_menu_option",
        AdminAction::UpdateMenuOption { .. } => "update_menu_option",
        AdminAction::DeleteMenuOption { .. } => "delete_menu_option",
        AdminAction::CreateOptionGroup { .. } => "create_option_group",
        AdminAction::UpdateOptionGroup { .. } => "update_option_group",
        AdminAction::DeleteOptionGroup { .. } => "delete_option_group",
        AdminAction::LinkOptionGroup { .. } => "link_option_group",
        AdminAction::CreateBanner { .. } => "create_banner",
        AdminAction::UpdateBanner { .. } => "update_banner",
        AdminAction::DeleteBanner { .. } => "delete_banner",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn ctx() -> CallerContext {
        CallerContext {
            caller_id: "adm-1".to_string(),
        }
    }

    fn profile(user_id: &str, role: &str) -> Profile {
        Profile {
            user_id: user_id.to_string(),
            role: role.to_string(),
            email: Some(format!("{user_id}@example.com")),
            display_name: None,
            phone: None,
            approval_status: "pending".to_string(),
            rejection_reason: None,
            suspended: false,
            is_online: false,
            is_available: false,
            vehicle_type: None,
            deletion_requested: false,
            created_at: Utc::now(),
        }
    }

    fn withdrawal(request_id: &str, requester: &str, amount: Decimal) -> FinanceRequest {
        FinanceRequest {
            request_id: request_id.to_string(),
            requester_id: requester.to_string(),
            kind: "withdrawal".to_string(),
            amount,
            status: "pending".to_string(),
            admin_note: None,
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn test_approve_driver_sets_status_and_notifies() {
        let memory = Arc::new(MemoryStore::new());
        memory.seed_profile(profile("drv-1", "driver")).await;
        let handlers = AdminHandlers::new(memory.clone());

        let response = handlers
            .dispatch(
                &ctx(),
                AdminAction::ApproveDriver {
                    user_id: "drv-1".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(response["success"], true);
        let updated = memory.get_profile("drv-1").await.unwrap().unwrap();
        assert_eq!(updated.approval_status, "approved");
        assert_eq!(memory.notifications().await.len(), 1);
    }

    #[tokio::test]
    async fn test_approve_driver_rejects_wrong_role() {
        let memory = Arc::new(MemoryStore::new());
        memory.seed_profile(profile("mer-1", "merchant")).await;
        let handlers = AdminHandlers::new(memory);

        let err = handlers
            .dispatch(
                &ctx(),
                AdminAction::ApproveDriver {
                    user_id: "mer-1".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_user_forbidden_for_admin() {
        let memory = Arc::new(MemoryStore::new());
        memory.seed_profile(profile("adm-2", "admin")).await;
        let handlers = AdminHandlers::new(memory.clone());

        let err = handlers
            .dispatch(
                &ctx(),
                AdminAction::DeleteUser {
                    user_id: "adm-2".to_string(),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Forbidden(_)));
        assert!(memory.get_profile("adm-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_withdrawal_approval_is_already_processed() {
        let memory = Arc::new(MemoryStore::new());
        memory.seed_profile(profile("drv-1", "driver")).await;
        memory
            .seed_finance_request(withdrawal("wr-1", "drv-1", Decimal::new(10000, 2)))
            .await;
        let handlers = AdminHandlers::new(memory.clone());

        let approve = || AdminAction::ApproveWithdrawal {
            request_id: "wr-1".to_string(),
            note: None,
        };

        let first = handlers.dispatch(&ctx(), approve()).await.unwrap();
        assert_eq!(first["already_processed"], false);

        let second = handlers.dispatch(&ctx(), approve()).await.unwrap();
        assert_eq!(second["success"], true);
        assert_eq!(second["already_processed"], true);

        // Approval moves no wallet money.
        assert!(memory.get_wallet("drv-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_withdrawal_rejection_refunds_exact_amount() {
        let memory = Arc::new(MemoryStore::new());
        memory.seed_profile(profile("drv-1", "driver")).await;
        let amount = Decimal::new(12345, 2);
        memory
            .seed_finance_request(withdrawal("wr-1", "drv-1", amount))
            .await;
        let handlers = AdminHandlers::new(memory.clone());

        let response = handlers
            .dispatch(
                &ctx(),
                AdminAction::RejectWithdrawal {
                    request_id: "wr-1".to_string(),
                    reason: Some("bank details invalid".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(response["already_processed"], false);

        let request = memory.get_finance_request("wr-1").await.unwrap().unwrap();
        assert_eq!(request.status, "rejected");
        assert_eq!(request.admin_note.as_deref(), Some("bank details invalid"));

        let wallet = memory.get_wallet("drv-1").await.unwrap().unwrap();
        assert_eq!(wallet.balance, amount);
        let entries = memory.ledger().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, "refund");
        assert_eq!(entries[0].amount, amount);

        // Replay changes nothing further.
        let replay = handlers
            .dispatch(
                &ctx(),
                AdminAction::RejectWithdrawal {
                    request_id: "wr-1".to_string(),
                    reason: Some("bank details invalid".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(replay["already_processed"], true);
        assert_eq!(memory.ledger().await.len(), 1);
        let wallet = memory.get_wallet("drv-1").await.unwrap().unwrap();
        assert_eq!(wallet.balance, amount);
    }

    #[tokio::test]
    async fn test_topup_approval_credits_once() {
        let memory = Arc::new(MemoryStore::new());
        memory.seed_profile(profile("cust-1", "customer")).await;
        let mut request = withdrawal("tp-1", "cust-1", Decimal::new(5000, 2));
        request.kind = "topup".to_string();
        memory.seed_finance_request(request).await;
        let handlers = AdminHandlers::new(memory.clone());

        let approve = || AdminAction::ApproveTopup {
            request_id: "tp-1".to_string(),
            note: None,
        };
        handlers.dispatch(&ctx(), approve()).await.unwrap();
        handlers.dispatch(&ctx(), approve()).await.unwrap();

        let wallet = memory.get_wallet("cust-1").await.unwrap().unwrap();
        assert_eq!(wallet.balance, Decimal::new(5000, 2));
        assert_eq!(memory.ledger().await.len(), 1);
    }

    #[tokio::test]
    async fn test_settle_rejects_kind_mismatch() {
        let memory = Arc::new(MemoryStore::new());
        memory
            .seed_finance_request(withdrawal("wr-1", "drv-1", Decimal::ONE))
            .await;
        let handlers = AdminHandlers::new(memory);

        let err = handlers
            .dispatch(
                &ctx(),
                AdminAction::ApproveTopup {
                    request_id: "wr-1".to_string(),
                    note: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_manual_topup_requires_positive_amount() {
        let memory = Arc::new(MemoryStore::new());
        memory.seed_profile(profile("cust-1", "customer")).await;
        let handlers = AdminHandlers::new(memory);

        let err = handlers
            .dispatch(
                &ctx(),
                AdminAction::ManualTopup {
                    account_id: "cust-1".to_string(),
                    amount: Decimal::ZERO,
                    description: None,
                    idempotency_key: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_account_deletion_requires_request() {
        let memory = Arc::new(MemoryStore::new());
        memory.seed_profile(profile("cust-1", "customer")).await;
        let handlers = AdminHandlers::new(memory.clone());

        let err = handlers
            .dispatch(
                &ctx(),
                AdminAction::ApproveAccountDeletion {
                    user_id: "cust-1".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(memory.get_profile("cust-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_user_emails_filters_by_role() {
        let memory = Arc::new(MemoryStore::new());
        memory.seed_profile(profile("drv-1", "driver")).await;
        memory.seed_profile(profile("cust-1", "customer")).await;
        let handlers = AdminHandlers::new(memory);

        let response = handlers
            .dispatch(
                &ctx(),
                AdminAction::GetUserEmails {
                    role: Some("driver".to_string()),
                },
            )
            .await
            .unwrap();
        let emails = response["emails"].as_array().unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0], "drv-1@example.com");
    }

    #[tokio::test]
    async fn test_update_missing_catalog_record_is_not_found() {
        let memory = Arc::new(MemoryStore::new());
        let handlers = AdminHandlers::new(memory);

        let err = handlers
            .dispatch(
                &ctx(),
                AdminAction::UpdateCoupon {
                    coupon_id: "cp-1".to_string(),
                    data: json!({"discount": 10}),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_option_group_delete_detaches_links() {
        let memory = Arc::new(MemoryStore::new());
        let handlers = AdminHandlers::new(memory.clone());

        handlers
            .dispatch(
                &ctx(),
                AdminAction::CreateOptionGroup {
                    group_id: "og-1".to_string(),
                    data: json!({"name": "Extras"}),
                },
            )
            .await
            .unwrap();
        handlers
            .dispatch(
                &ctx(),
                AdminAction::CreateMenuItem {
                    item_id: "it-1".to_string(),
                    merchant_id: "mer-1".to_string(),
                    data: json!({"name": "Burger"}),
                },
            )
            .await
            .unwrap();
        handlers
            .dispatch(
                &ctx(),
                AdminAction::LinkOptionGroup {
                    item_id: "it-1".to_string(),
                    group_id: "og-1".to_string(),
                    linked: true,
                },
            )
            .await
            .unwrap();
        assert!(memory.has_item_link("it-1", "og-1").await);

        handlers
            .dispatch(
                &ctx(),
                AdminAction::DeleteOptionGroup {
                    group_id: "og-1".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(!memory.has_item_link("it-1", "og-1").await);
        assert!(
            memory
                .get_catalog_record("option_group", "og-1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_upsert_system_config() {
        let memory = Arc::new(MemoryStore::new());
        let handlers = AdminHandlers::new(memory.clone());

        handlers
            .dispatch(
                &ctx(),
                AdminAction::UpsertSystemConfig {
                    key: "service_fee".to_string(),
                    value: json!({"percent": 10}),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            memory.system_config("service_fee").await,
            Some(json!({"percent": 10}))
        );
    }
}
