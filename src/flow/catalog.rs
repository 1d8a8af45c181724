//! Flow step catalog
//!
//! Static, ordered descriptions of each demonstrated integration pattern.

use super::template::{render_lenient, Variables};
use crate::network::HttpMethod;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// An actor in a sequence diagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
    pub label: String,
}

impl Party {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Copies a value out of a response body into a flow variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub variable: String,
    /// JSON pointer into the response body, e.g. `/session_id`
    pub pointer: String,
}

/// The network call performed by an action step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAction {
    pub method: HttpMethod,
    /// Path template relative to the gateway base URL
    pub path: String,
    /// JSON body template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub captures: Vec<Capture>,
}

impl StepAction {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            captures: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn body(mut self, template: impl Into<String>) -> Self {
        self.body = Some(template.into());
        self
    }

    pub fn capture(mut self, variable: impl Into<String>, pointer: impl Into<String>) -> Self {
        self.captures.push(Capture {
            variable: variable.into(),
            pointer: pointer.into(),
        });
        self
    }
}

/// One arrow in the sequence diagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    /// Zero-based position, assigned by [`FlowDefinition::step`]
    pub ordinal: usize,
    pub from: String,
    pub to: String,
    pub title: String,
    /// Display template; placeholders are filled from flow variables
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<StepAction>,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            ordinal: 0,
            from: from.into(),
            to: to.into(),
            title: title.into(),
            description: String::new(),
            action: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn action(mut self, action: StepAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn is_action(&self) -> bool {
        self.action.is_some()
    }

    /// Description with known variables substituted
    pub fn display(&self, variables: &Variables) -> String {
        render_lenient(&self.description, variables)
    }
}

/// A named, ordered demonstration of one integration pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parties: Vec<Party>,
    pub steps: Vec<Step>,
    /// Sample values used when the user has not set a variable
    #[serde(default)]
    pub defaults: Variables,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Flow {flow}: step ordinals must be contiguous from 0, found {found} at position {position}")]
    OrdinalGap {
        flow: String,
        position: usize,
        found: usize,
    },
    #[error("Flow {flow}: duplicate step id {step}")]
    DuplicateStep { flow: String, step: String },
    #[error("Flow {flow}: step {step} references unknown party {party}")]
    UnknownParty {
        flow: String,
        step: String,
        party: String,
    },
    #[error("Flow {flow}: duplicate party id {party}")]
    DuplicateParty { flow: String, party: String },
    #[error("Flow {flow}: action step {step} has an empty path")]
    EmptyPath { flow: String, step: String },
    #[error("Duplicate flow id {0}")]
    DuplicateFlow(String),
}

impl FlowDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            parties: Vec::new(),
            steps: Vec::new(),
            defaults: Variables::new(),
        }
    }

    pub fn party(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.parties.push(Party::new(id, label));
        self
    }

    /// Append a step, assigning the next ordinal
    pub fn step(mut self, mut step: Step) -> Self {
        step.ordinal = self.steps.len();
        self.steps.push(step);
        self
    }

    pub fn default_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[allow(dead_code)] // Pairs with len()
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check the structural invariants of the flow
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut party_ids = HashSet::new();
        for party in &self.parties {
            if !party_ids.insert(party.id.as_str()) {
                return Err(CatalogError::DuplicateParty {
                    flow: self.id.clone(),
                    party: party.id.clone(),
                });
            }
        }

        let mut step_ids = HashSet::new();
        for (position, step) in self.steps.iter().enumerate() {
            if step.ordinal != position {
                return Err(CatalogError::OrdinalGap {
                    flow: self.id.clone(),
                    position,
                    found: step.ordinal,
                });
            }
            if !step_ids.insert(step.id.as_str()) {
                return Err(CatalogError::DuplicateStep {
                    flow: self.id.clone(),
                    step: step.id.clone(),
                });
            }
            for party in [&step.from, &step.to] {
                if !party_ids.contains(party.as_str()) {
                    return Err(CatalogError::UnknownParty {
                        flow: self.id.clone(),
                        step: step.id.clone(),
                        party: party.clone(),
                    });
                }
            }
            if let Some(action) = &step.action {
                if action.path.trim().is_empty() {
                    return Err(CatalogError::EmptyPath {
                        flow: self.id.clone(),
                        step: step.id.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// All flows the server can run
#[derive(Debug, Clone, Default)]
pub struct FlowCatalog {
    flows: Vec<FlowDefinition>,
}

impl FlowCatalog {
    /// Build a catalog, rejecting invalid or duplicate flows
    pub fn new(flows: Vec<FlowDefinition>) -> Result<Self, CatalogError> {
        let mut ids = HashSet::new();
        for flow in &flows {
            flow.validate()?;
            if !ids.insert(flow.id.clone()) {
                return Err(CatalogError::DuplicateFlow(flow.id.clone()));
            }
        }
        Ok(Self { flows })
    }

    /// The flows shipped with the demo
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::new(vec![
            hosted_payment_page(),
            server_side(),
            on_site_messaging(),
        ])
    }

    pub fn get(&self, id: &str) -> Option<&FlowDefinition> {
        self.flows.iter().find(|f| f.id == id)
    }

    pub fn flows(&self) -> &[FlowDefinition] {
        &self.flows
    }
}

// ============================================================
// Built-in flows
// ============================================================

macro_rules! order_lines {
    () => {
        r#"[{"type":"physical","reference":"demo-sku-1","name":"Demo item","quantity":1,"unit_price":{{order_amount}},"tax_rate":0,"total_amount":{{order_amount}},"total_tax_amount":0}]"#
    };
}

const SESSION_BODY: &str = concat!(
    r#"{"purchase_country":"{{purchase_country}}","purchase_currency":"{{purchase_currency}}","locale":"{{locale}}","order_amount":{{order_amount}},"order_tax_amount":0,"order_lines":"#,
    order_lines!(),
    "}"
);

const ORDER_BODY: &str = concat!(
    r#"{"purchase_country":"{{purchase_country}}","purchase_currency":"{{purchase_currency}}","order_amount":{{order_amount}},"order_tax_amount":0,"merchant_reference1":"{{merchant_reference}}","order_lines":"#,
    order_lines!(),
    "}"
);

fn hosted_payment_page() -> FlowDefinition {
    FlowDefinition::new(
        "hosted-payment-page",
        "Hosted Payment Page",
        "The merchant creates a payment session, hands the customer to a hosted page and places the order once the page reports an authorization.",
    )
    .party("customer", "Customer")
    .party("merchant", "Merchant")
    .party("network", "Payment network")
    .party("hpp", "Hosted payment page")
    .default_var("purchase_country", "US")
    .default_var("purchase_currency", "USD")
    .default_var("locale", "en-US")
    .default_var("order_amount", "10000")
    .default_var("merchant_reference", "demo-order-1")
    .default_var("merchant_url", "https://merchant.example/checkout")
    .step(
        Step::new("checkout", "customer", "merchant", "Customer proceeds to checkout")
            .describe("Cart total {{order_amount}} {{purchase_currency}}"),
    )
    .step(
        Step::new("create-session", "merchant", "network", "Create payment session")
            .describe("Server-to-server call with the order details")
            .action(
                StepAction::post("/payments/v1/sessions")
                    .body(SESSION_BODY)
                    .capture("session_id", "/session_id")
                    .capture("client_token", "/client_token"),
            ),
    )
    .step(
        Step::new("create-hpp-session", "merchant", "hpp", "Create hosted page session")
            .describe("Wraps payment session {{session_id}}")
            .action(
                StepAction::post("/hpp/v1/sessions")
                    .body(
                        r#"{"payment_session_url":"{{api_base_url}}/payments/v1/sessions/{{session_id}}","merchant_urls":{"success":"{{merchant_url}}/success","cancel":"{{merchant_url}}/cancel","failure":"{{merchant_url}}/failure"}}"#,
                    )
                    .capture("hpp_session_id", "/session_id")
                    .capture("redirect_url", "/redirect_url"),
            ),
    )
    .step(
        Step::new("redirect", "merchant", "customer", "Redirect customer to the hosted page")
            .describe("Browser follows {{redirect_url}}"),
    )
    .step(Step::new("pay", "customer", "hpp", "Customer completes payment"))
    .step(
        Step::new("return", "hpp", "merchant", "Hosted page redirects back")
            .describe("Customer lands on {{merchant_url}}/success"),
    )
    .step(
        Step::new("read-hpp-session", "merchant", "hpp", "Read hosted session status")
            .action(
                StepAction::get("/hpp/v1/sessions/{{hpp_session_id}}")
                    .capture("authorization_token", "/authorization_token")
                    .capture("hpp_status", "/status"),
            ),
    )
    .step(
        Step::new("create-order", "merchant", "network", "Create order")
            .describe("Consumes authorization {{authorization_token}}")
            .action(
                StepAction::post("/payments/v1/authorizations/{{authorization_token}}/order")
                    .body(ORDER_BODY)
                    .capture("order_id", "/order_id"),
            ),
    )
    .step(
        Step::new("confirm", "merchant", "customer", "Show order confirmation")
            .describe("Order {{order_id}} placed"),
    )
}

fn server_side() -> FlowDefinition {
    FlowDefinition::new(
        "server-side",
        "Server-side payment request",
        "The merchant backend creates a payment request, the customer approves it with the network, and the backend authorizes the payment.",
    )
    .party("customer", "Customer")
    .party("merchant", "Merchant")
    .party("network", "Payment network")
    .party("acquirer", "Acquirer")
    .default_var("amount", "10000")
    .default_var("currency", "USD")
    .default_var("payment_request_reference", "demo-request-1")
    .default_var("return_url", "https://merchant.example/return")
    .step(
        Step::new("checkout", "customer", "merchant", "Customer confirms checkout")
            .describe("Total {{amount}} {{currency}}"),
    )
    .step(
        Step::new("create-request", "merchant", "network", "Create payment request")
            .action(
                StepAction::post("/v2/payment/requests")
                    .body(
                        r#"{"amount":{{amount}},"currency":"{{currency}}","payment_request_reference":"{{payment_request_reference}}","customer_interaction_config":{"method":"HANDOVER","return_url":"{{return_url}}"}}"#,
                    )
                    .capture("payment_request_id", "/payment_request_id")
                    .capture(
                        "payment_request_url",
                        "/state_context/customer_interaction/payment_request_url",
                    ),
            ),
    )
    .step(
        Step::new("handover", "merchant", "customer", "Hand customer over to the network")
            .describe("Customer opens {{payment_request_url}}"),
    )
    .step(Step::new("approve", "customer", "network", "Customer approves the payment"))
    .step(
        Step::new("authorize", "merchant", "network", "Authorize payment")
            .describe("Authorizes request {{payment_request_id}}")
            .action(
                StepAction::post("/v2/payment/requests/{{payment_request_id}}/authorize")
                    .body(r#"{"amount":{{amount}},"currency":"{{currency}}"}"#)
                    .capture("payment_transaction_id", "/payment_transaction_id"),
            ),
    )
    .step(
        Step::new("settle", "network", "acquirer", "Network settles with the acquirer")
            .describe("Transaction {{payment_transaction_id}}"),
    )
    .step(Step::new("confirm", "merchant", "customer", "Show confirmation"))
}

fn on_site_messaging() -> FlowDefinition {
    FlowDefinition::new(
        "on-site-messaging",
        "On-site messaging",
        "The merchant fetches a promotional placement for the product page.",
    )
    .party("customer", "Customer")
    .party("merchant", "Merchant")
    .party("network", "Payment network")
    .default_var("client_id", "demo-client")
    .default_var("placement_key", "credit-promotion-badge")
    .default_var("locale", "en-US")
    .default_var("purchase_amount", "10000")
    .step(Step::new("view", "customer", "merchant", "Customer opens product page"))
    .step(
        Step::new("fetch-placement", "merchant", "network", "Fetch messaging placement")
            .describe("Placement {{placement_key}} for {{locale}}")
            .action(
                StepAction::get(
                    "/messaging/v1/placements?client_id={{client_id}}&placement_key={{placement_key}}&locale={{locale}}&purchase_amount={{purchase_amount}}",
                )
                .capture("placement_text", "/content/nodes/0/value"),
            ),
    )
    .step(
        Step::new("render", "merchant", "customer", "Render placement")
            .describe("{{placement_text}}"),
    )
}
