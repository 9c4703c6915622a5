//! Technician roster, departments, and support tickets.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::RngExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Technician {
    pub id: String,
    pub name: String,
    pub skills: Vec<String>,
}

impl Technician {
    fn new(id: &str, name: &str, skills: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            skills: skills.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn has_skill(&self, skill: &str) -> bool {
        self.skills.iter().any(|s| s == skill)
    }
}

/// Read-only set of field technicians tickets can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    technicians: Vec<Technician>,
}

impl Default for Roster {
    fn default() -> Self {
        Self {
            technicians: vec![
                Technician::new("tech-01", "Anil Kumar", &["Fiber", "IPTV"]),
                Technician::new("tech-02", "Sunita Sharma", &["Broadband", "Billing"]),
                Technician::new("tech-03", "Rajesh Singh", &["OTT", "IPTV"]),
                Technician::new("tech-04", "Priya Mehta", &["Fiber", "Network"]),
            ],
        }
    }
}

impl Roster {
    /// Build a roster from an override list; an empty list keeps the default.
    pub fn new(technicians: Vec<Technician>) -> Self {
        if technicians.is_empty() {
            return Self::default();
        }
        Self { technicians }
    }

    pub fn technicians(&self) -> &[Technician] {
        &self.technicians
    }

    pub fn get(&self, id: &str) -> Option<&Technician> {
        self.technicians.iter().find(|t| t.id == id)
    }

    /// Technicians whose skills contain `category` verbatim or its first
    /// whitespace-separated token.
    pub fn candidates(&self, category: &str) -> Vec<&Technician> {
        let head = category.split_whitespace().next().unwrap_or(category);
        self.technicians
            .iter()
            .filter(|t| t.has_skill(category) || t.has_skill(head))
            .collect()
    }

    /// Pick a technician for `category`: uniformly among the skilled ones,
    /// or among everyone when nobody matches.
    pub fn assign(&self, category: &str, rng: &mut StdRng) -> Option<&Technician> {
        let skilled = self.candidates(category);
        if skilled.is_empty() {
            if self.technicians.is_empty() {
                return None;
            }
            let idx = rng.random_range(0..self.technicians.len());
            return self.technicians.get(idx);
        }
        let idx = rng.random_range(0..skilled.len());
        skilled.get(idx).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Department {
    #[serde(rename = "Business Operations")]
    BusinessOperations,
    #[serde(rename = "Enterprise Sales")]
    EnterpriseSales,
    #[serde(rename = "Technology Operations")]
    TechnologyOperations,
    #[serde(rename = "NOC Operations")]
    NocOperations,
    #[serde(rename = "Admin & HR")]
    AdminHr,
}

impl Department {
    pub const ALL: [Department; 5] = [
        Self::BusinessOperations,
        Self::EnterpriseSales,
        Self::TechnologyOperations,
        Self::NocOperations,
        Self::AdminHr,
    ];

    /// Route a ticket category to the department that owns it.
    pub fn for_category(category: &str) -> Self {
        let head = category
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match head.as_str() {
            "internet" | "fiber" | "network" | "broadband" => Self::NocOperations,
            "billing" => Self::BusinessOperations,
            _ => Self::TechnologyOperations,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BusinessOperations => "Business Operations",
            Self::EnterpriseSales => "Enterprise Sales",
            Self::TechnologyOperations => "Technology Operations",
            Self::NocOperations => "NOC Operations",
            Self::AdminHr => "Admin & HR",
        }
    }
}

impl std::fmt::Display for Department {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    New,
    Assigned,
    #[serde(rename = "In Progress")]
    InProgress,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub category: String,
    pub details: String,
    pub status: TicketStatus,
    /// Technician id.
    pub assigned_to: Option<String>,
    pub department: Department,
    pub assigned_time: DateTime<Utc>,
    pub resolved_time: Option<DateTime<Utc>>,
}

/// `TCK-` followed by five digits in 10000..=99999.
pub fn ticket_id(rng: &mut StdRng) -> String {
    format!("TCK-{}", rng.random_range(10_000..100_000u32))
}

/// Log the customer and technician SMS a real deployment would send.
pub fn log_ticket_notifications(ticket: &Ticket, technician: &Technician) {
    tracing::info!(
        ticket_id = %ticket.id,
        technician = %technician.name,
        department = %ticket.department,
        "Ticket assigned"
    );
    tracing::info!(
        to = %ticket.customer_name,
        "SMS to customer: Your ticket {} has been assigned to technician {}. Expect a call shortly.",
        ticket.id,
        technician.name
    );
    tracing::info!(
        to = %technician.name,
        "SMS to technician: New ticket {} for {} ({}) has been assigned to you.",
        ticket.id,
        ticket.customer_name,
        ticket.category
    );
}
