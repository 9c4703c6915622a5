//! Mock backends behind the agent's tools.
//!
//! Nothing here touches a real billing system or device. Results are fixed
//! or derived from the arguments, so calls replay the same way every time
//! (apart from the ids that embed the wall clock or the registry RNG).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::roster::{self, Department, Ticket, TicketStatus};
use super::{FunctionDeclaration, ParameterSchema, ToolArgs, ToolContext, ToolError, ToolHandler};
use crate::call::CallEvent;

/// System line added to the transcript when the agent hands the call over.
pub const TRANSFER_NOTE: &str = "Call is being transferred to a human manager...";

/// A prospective customer asking for a new line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub request_id: String,
    pub customer_name: String,
    pub village: String,
    pub mandal: String,
    pub district: String,
    pub requested_at: DateTime<Utc>,
}

pub(super) fn all() -> Vec<Box<dyn ToolHandler>> {
    vec![
        Box::new(GetBilling),
        Box::new(CreateTicket),
        Box::new(SendSms),
        Box::new(GetDeviceDetails),
        Box::new(RestartDevice),
        Box::new(TransferCallToManager),
        Box::new(ResolveIssue),
        Box::new(CreateNewConnectionRequest),
    ]
}

fn declare(name: &str, description: &str, parameters: ParameterSchema) -> FunctionDeclaration {
    FunctionDeclaration {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    }
}

fn account_only() -> ParameterSchema {
    ParameterSchema::object().string("accountId", None)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Last four characters of an account id.
fn last_four(account_id: &str) -> String {
    let chars: Vec<char> = account_id.chars().collect();
    chars[chars.len().saturating_sub(4)..].iter().collect()
}

struct GetBilling;

impl ToolHandler for GetBilling {
    fn declaration(&self) -> FunctionDeclaration {
        declare("getBilling", "Get billing details.", account_only())
    }

    fn invoke(&self, args: ToolArgs<'_>, _ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
        let account_id = args.string("accountId")?;
        tracing::debug!(%account_id, "Billing lookup");
        Ok(json!({
            "balance": 699.00,
            "lastInvoiceAmount": 699.00,
            "lastInvoiceDate": "2023-10-01",
            "dueDate": "2023-10-28",
            "planName": "Fiber 100Mbps",
            "pastDue": false,
        }))
    }
}

struct CreateTicket;

impl ToolHandler for CreateTicket {
    fn declaration(&self) -> FunctionDeclaration {
        declare(
            "createTicket",
            "Create a support ticket.",
            ParameterSchema::object()
                .string("accountId", None)
                .string("customerName", None)
                .string("category", None)
                .string("details", None),
        )
    }

    fn invoke(&self, args: ToolArgs<'_>, ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
        let customer_id = args.string("accountId")?;
        let customer_name = args.string("customerName")?;
        let category = args.string("category")?;
        let details = args.string("details")?;

        let technician = ctx
            .roster
            .assign(&category, ctx.rng)
            .cloned()
            .ok_or_else(|| ToolError::Failed("No technicians available".into()))?;

        let ticket = Ticket {
            id: roster::ticket_id(ctx.rng),
            customer_id,
            customer_name,
            department: Department::for_category(&category),
            category,
            details,
            status: TicketStatus::Assigned,
            assigned_to: Some(technician.id.clone()),
            assigned_time: Utc::now(),
            resolved_time: None,
        };
        roster::log_ticket_notifications(&ticket, &technician);

        let result = json!({
            "ticketId": ticket.id,
            "priority": "Normal",
            "eta": "2 hours",
            "technicianName": technician.name,
        });
        ctx.emit(CallEvent::TicketCreated(ticket));
        Ok(result)
    }
}

struct SendSms;

impl ToolHandler for SendSms {
    fn declaration(&self) -> FunctionDeclaration {
        declare(
            "sendSms",
            "Sends an SMS to the customer.",
            account_only().string("message", None),
        )
    }

    fn invoke(&self, args: ToolArgs<'_>, _ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
        let account_id = args.string("accountId")?;
        let message = args.string("message")?;
        tracing::info!(%account_id, "Simulated SMS: {message}");
        Ok(json!({ "status": "SMS sent successfully." }))
    }
}

struct GetDeviceDetails;

impl ToolHandler for GetDeviceDetails {
    fn declaration(&self) -> FunctionDeclaration {
        declare(
            "getDeviceDetails",
            "Get technical details about the customer's device/modem.",
            account_only(),
        )
    }

    fn invoke(&self, args: ToolArgs<'_>, _ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
        let account_id = args.string("accountId")?;
        Ok(json!({
            "deviceId": format!("ONT-{}", last_four(&account_id)),
            "status": "Online",
            "uptime": "72 hours",
        }))
    }
}

struct RestartDevice;

impl ToolHandler for RestartDevice {
    fn declaration(&self) -> FunctionDeclaration {
        declare(
            "restartDevice",
            "Remotely restarts the customer's device/modem.",
            account_only(),
        )
    }

    fn invoke(&self, args: ToolArgs<'_>, _ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
        let account_id = args.string("accountId")?;
        tracing::info!(%account_id, device = %format!("ONT-{}", last_four(&account_id)), "Simulated device restart");
        Ok(json!({ "status": "Restart command sent successfully." }))
    }
}

struct TransferCallToManager;

impl ToolHandler for TransferCallToManager {
    fn declaration(&self) -> FunctionDeclaration {
        declare(
            "transferCallToManager",
            "Transfers the call to a human manager for intervention.",
            account_only(),
        )
    }

    fn invoke(&self, args: ToolArgs<'_>, ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
        let account_id = args.string("accountId")?;
        tracing::info!(%account_id, "Transferring call to a human manager");
        ctx.forward_call();
        ctx.note(TRANSFER_NOTE);
        Ok(json!({
            "status": "Transfer initiated.",
            "transferId": format!("TR-{}", now_millis()),
        }))
    }
}

struct ResolveIssue;

impl ToolHandler for ResolveIssue {
    fn declaration(&self) -> FunctionDeclaration {
        declare(
            "resolveIssue",
            "Marks an issue as resolved by the agent without creating a technician ticket.",
            account_only().string("details", None),
        )
    }

    fn invoke(&self, args: ToolArgs<'_>, ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
        let account_id = args.string("accountId")?;
        let details = args.string("details")?;
        let resolution_id = format!("RES-{}", now_millis());
        tracing::info!(%account_id, %resolution_id, "Issue resolved by the agent: {details}");
        ctx.emit(CallEvent::IssueAutoResolved {
            account_id,
            details,
            resolution_id: resolution_id.clone(),
        });
        Ok(json!({
            "status": "Issue marked as resolved by agent.",
            "resolutionId": resolution_id,
        }))
    }
}

struct CreateNewConnectionRequest;

impl ToolHandler for CreateNewConnectionRequest {
    fn declaration(&self) -> FunctionDeclaration {
        declare(
            "createNewConnectionRequest",
            "Creates a request for a new internet connection for a new customer.",
            ParameterSchema::object()
                .string("customerName", Some("Customer's full name"))
                .string("village", None)
                .string("mandal", None)
                .string("district", None),
        )
    }

    fn invoke(&self, args: ToolArgs<'_>, ctx: &mut ToolContext<'_>) -> Result<Value, ToolError> {
        let request = ConnectionRequest {
            request_id: format!("NCR-{}", now_millis()),
            customer_name: args.string("customerName")?,
            village: args.string("village")?,
            mandal: args.string("mandal")?,
            district: args.string("district")?,
            requested_at: Utc::now(),
        };
        tracing::info!(
            request_id = %request.request_id,
            village = %request.village,
            mandal = %request.mandal,
            district = %request.district,
            "New connection request for {}",
            request.customer_name
        );
        let result = json!({
            "status": "New connection request created.",
            "requestId": request.request_id,
        });
        ctx.emit(CallEvent::NewConnectionRequested(request));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ToolCall, ToolEffect, ToolOutcome, ToolRegistry};
    use super::*;
    use crate::tools::Roster;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn run(reg: &mut ToolRegistry, name: &str, args: Value) -> (Value, Vec<ToolEffect>) {
        let out = reg.dispatch(&ToolCall {
            id: format!("id-{name}"),
            name: name.into(),
            args: args.as_object().cloned().unwrap_or_default(),
        });
        match out.response.response {
            ToolOutcome::Result(body) => (serde_json::from_str(&body).unwrap(), out.effects),
            ToolOutcome::Error(e) => panic!("{name} failed: {e}"),
        }
    }

    fn registry(seed: u64) -> ToolRegistry {
        ToolRegistry::standard(Roster::default(), StdRng::seed_from_u64(seed))
    }

    #[test]
    fn billing_snapshot_is_fixed() {
        let (value, effects) = run(&mut registry(1), "getBilling", json!({"accountId": "AC1"}));
        assert_eq!(value["balance"], 699.0);
        assert_eq!(value["planName"], "Fiber 100Mbps");
        assert_eq!(value["pastDue"], false);
        assert!(effects.is_empty());
    }

    #[test]
    fn create_ticket_emits_assigned_ticket() {
        let mut reg = registry(5);
        let (value, effects) = run(
            &mut reg,
            "createTicket",
            json!({
                "accountId": "AC1001",
                "customerName": "Ramesh",
                "category": "IPTV",
                "details": "No channels",
            }),
        );
        assert_eq!(value["priority"], "Normal");
        assert_eq!(value["eta"], "2 hours");
        assert!(value["ticketId"].as_str().unwrap().starts_with("TCK-"));

        let [ToolEffect::Emit(CallEvent::TicketCreated(ticket))] = effects.as_slice() else {
            panic!("expected one TicketCreated, got {effects:?}");
        };
        assert_eq!(ticket.status, TicketStatus::Assigned);
        assert_eq!(ticket.department, Department::TechnologyOperations);
        assert_eq!(ticket.customer_id, "AC1001");
        let tech = ticket.assigned_to.as_deref().unwrap();
        assert!(tech == "tech-01" || tech == "tech-03");
        assert_eq!(value["technicianName"], reg.roster().get(tech).unwrap().name);
    }

    #[test]
    fn fiber_cut_tickets_go_to_fiber_technicians() {
        let mut reg = registry(99);
        for _ in 0..100 {
            let (_, effects) = run(
                &mut reg,
                "createTicket",
                json!({"accountId": "A", "customerName": "B", "category": "Fiber Cut", "details": "D"}),
            );
            let Some(ToolEffect::Emit(CallEvent::TicketCreated(t))) = effects.first() else {
                panic!("missing ticket");
            };
            let tech = t.assigned_to.as_deref().unwrap();
            assert!(tech == "tech-01" || tech == "tech-04", "got {tech}");
            assert_eq!(t.department, Department::NocOperations);
        }
    }

    #[test]
    fn device_tools_key_on_account() {
        let mut reg = registry(2);
        let (details, _) = run(&mut reg, "getDeviceDetails", json!({"accountId": "AC5678"}));
        assert_eq!(details, json!({"deviceId": "ONT-5678", "status": "Online", "uptime": "72 hours"}));

        let (short, _) = run(&mut reg, "getDeviceDetails", json!({"accountId": "42"}));
        assert_eq!(short["deviceId"], "ONT-42");

        let (restart, _) = run(&mut reg, "restartDevice", json!({"accountId": "AC5678"}));
        assert_eq!(restart["status"], "Restart command sent successfully.");
    }

    #[test]
    fn transfer_requests_forward_and_note() {
        let (value, effects) = run(&mut registry(3), "transferCallToManager", json!({"accountId": "AC1"}));
        assert_eq!(value["status"], "Transfer initiated.");
        assert!(value["transferId"].as_str().unwrap().starts_with("TR-"));
        // The forward event precedes the transcript note.
        assert!(matches!(effects[0], ToolEffect::ForwardCall));
        assert!(matches!(&effects[1], ToolEffect::SystemNote(t) if t == TRANSFER_NOTE));
        assert_eq!(effects.len(), 2);
    }

    #[test]
    fn resolve_issue_emits_resolution_only() {
        let (value, effects) = run(
            &mut registry(4),
            "resolveIssue",
            json!({"accountId": "AC1", "details": "Router restarted, working now"}),
        );
        assert!(value["resolutionId"].as_str().unwrap().starts_with("RES-"));
        assert_eq!(effects.len(), 1);
        assert!(matches!(
            &effects[0],
            ToolEffect::Emit(CallEvent::IssueAutoResolved { account_id, .. }) if account_id == "AC1"
        ));
    }

    #[test]
    fn new_connection_request_needs_no_account() {
        let (value, effects) = run(
            &mut registry(6),
            "createNewConnectionRequest",
            json!({"customerName": "Lakshmi", "village": "Pedana", "mandal": "Pedana", "district": "Krishna"}),
        );
        assert_eq!(value["status"], "New connection request created.");
        let Some(ToolEffect::Emit(CallEvent::NewConnectionRequested(req))) = effects.first() else {
            panic!("missing request event");
        };
        assert_eq!(req.district, "Krishna");
        assert_eq!(value["requestId"], req.request_id);
    }

    #[test]
    fn sms_ack_is_fixed() {
        let (value, _) = run(&mut registry(8), "sendSms", json!({"accountId": "AC1", "message": "hi"}));
        assert_eq!(value["status"], "SMS sent successfully.");
    }
}
