//! Wire messages exchanged between market agents.
//!
//! Every datagram carries one JSON object whose `tipo` field selects the
//! variant. Field names follow the market protocol.

use agora_core::{AgentId, Catalog, Location, SaleRecord};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Messages of the market protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tipo")]
pub enum MarketMessage {
    /// Offer request from a buyer, or the seller's offer in reply.
    ///
    /// A bare request carries neither field.
    #[serde(rename = "Peticion_Cliente")]
    OfferRequest {
        /// The sender's catalog.
        #[serde(rename = "productos", default, skip_serializing_if = "Option::is_none")]
        products: Option<Catalog>,
        /// The sender's location.
        #[serde(rename = "ubicacion", default, skip_serializing_if = "Option::is_none")]
        location: Option<Location>,
    },

    /// A purchase reported by a buyer to the seller it bought from.
    #[serde(rename = "venta")]
    Sale(SaleRecord),

    /// A sale forwarded by a standard seller to adaptive sellers.
    #[serde(rename = "ventas_super_normal")]
    ForwardedSale {
        /// Seller that made the sale.
        #[serde(rename = "supermercado_id")]
        seller_id: AgentId,
        /// The sale itself.
        #[serde(rename = "venta")]
        sale: SaleRecord,
    },

    /// Epoch metrics broadcast between adaptive sellers.
    #[serde(rename = "metricas_smart")]
    Metrics {
        /// Sales made by the sender this epoch.
        #[serde(rename = "ventas_recientes", default)]
        recent_sales: Vec<SaleRecord>,
        /// The sender's full catalog.
        #[serde(rename = "catalogo")]
        catalog: Catalog,
    },
}

impl MarketMessage {
    /// A bare offer request.
    #[must_use]
    pub const fn request() -> Self {
        Self::OfferRequest {
            products: None,
            location: None,
        }
    }

    /// An offer carrying a catalog and location.
    #[must_use]
    pub const fn offer(products: Catalog, location: Location) -> Self {
        Self::OfferRequest {
            products: Some(products),
            location: Some(location),
        }
    }

    /// Creates a forwarded-sale message.
    #[must_use]
    pub const fn forwarded_sale(seller_id: AgentId, sale: SaleRecord) -> Self {
        Self::ForwardedSale { seller_id, sale }
    }

    /// Creates a metrics message.
    #[must_use]
    pub const fn metrics(recent_sales: Vec<SaleRecord>, catalog: Catalog) -> Self {
        Self::Metrics {
            recent_sales,
            catalog,
        }
    }

    /// The `tipo` value of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::OfferRequest { .. } => "Peticion_Cliente",
            Self::Sale(_) => "venta",
            Self::ForwardedSale { .. } => "ventas_super_normal",
            Self::Metrics { .. } => "metricas_smart",
        }
    }

    /// Serializes the message to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes a message from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// One datagram in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sending agent.
    pub from: AgentId,
    /// Receiving agent.
    pub to: AgentId,
    /// Raw JSON body.
    pub body: Vec<u8>,
}

impl Envelope {
    /// Wraps an encoded message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub fn seal(from: AgentId, to: AgentId, message: &MarketMessage) -> Result<Self, serde_json::Error> {
        Ok(Self {
            from,
            to,
            body: message.to_bytes()?,
        })
    }

    /// Decodes the body, or returns `None` for a malformed datagram.
    #[must_use]
    pub fn open(&self) -> Option<MarketMessage> {
        match MarketMessage::from_bytes(&self.body) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(from = %self.from, to = %self.to, error = %e, "dropping malformed message");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{ActionKind, CatalogEntry, EthicsVector};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use test_case::test_case;

    fn sale() -> SaleRecord {
        let mut purchased = BTreeMap::new();
        purchased.insert("Leche_2".to_string(), 3);
        SaleRecord {
            client_id: AgentId::from("buyer-7"),
            action: ActionKind::GeneralPurchase,
            purchased,
            timestamp: Utc::now(),
        }
    }

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.insert("Leche", CatalogEntry::new("Leche_2", 40, EthicsVector::new()));
        catalog
    }

    #[test]
    fn bare_request_has_only_tipo() {
        let json = serde_json::to_value(MarketMessage::request()).unwrap();
        assert_eq!(json, serde_json::json!({"tipo": "Peticion_Cliente"}));
    }

    #[test]
    fn offer_wire_format() {
        let message = MarketMessage::offer(catalog(), Location::new(10.0, 20.0));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["tipo"], "Peticion_Cliente");
        assert_eq!(json["productos"]["Leche"]["variedad"], "Leche_2");
        assert_eq!(json["ubicacion"], serde_json::json!([10.0, 20.0]));
    }

    #[test]
    fn sale_fields_sit_next_to_tipo() {
        let json = serde_json::to_value(MarketMessage::Sale(sale())).unwrap();
        assert_eq!(json["tipo"], "venta");
        assert_eq!(json["cliente_id"], "buyer-7");
        assert_eq!(json["accion"], "compra");
        assert_eq!(json["productos_comprados"]["Leche_2"], 3);
    }

    #[test]
    fn forwarded_sale_and_metrics_names() {
        let json = serde_json::to_value(MarketMessage::forwarded_sale(AgentId::from("seller-1"), sale())).unwrap();
        assert_eq!(json["tipo"], "ventas_super_normal");
        assert_eq!(json["supermercado_id"], "seller-1");
        assert_eq!(json["venta"]["cliente_id"], "buyer-7");

        let json = serde_json::to_value(MarketMessage::metrics(vec![sale()], catalog())).unwrap();
        assert_eq!(json["tipo"], "metricas_smart");
        assert_eq!(json["ventas_recientes"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["catalogo"]["Leche"]["stock"], 40);
    }

    #[test]
    fn decodes_hand_written_metrics() {
        let raw = br#"{"tipo":"metricas_smart","catalogo":{}}"#;
        let message = MarketMessage::from_bytes(raw).unwrap();
        assert_eq!(message, MarketMessage::metrics(Vec::new(), Catalog::new()));
    }

    #[test_case(b"not json" ; "not json")]
    #[test_case(br#"{"tipo":"desconocido"}"# ; "unknown tipo")]
    #[test_case(br#"{"productos":{}}"# ; "missing tipo")]
    #[test_case(br#"{"tipo":"metricas_smart"}"# ; "metrics without catalog")]
    #[test_case(br#"{"tipo":"venta","cliente_id":"b"}"# ; "sale missing fields")]
    fn malformed_envelope_opens_to_none(body: &[u8]) {
        let envelope = Envelope {
            from: AgentId::from("a"),
            to: AgentId::from("b"),
            body: body.to_vec(),
        };
        assert!(envelope.open().is_none());
    }

    #[test]
    fn sealed_envelope_opens() {
        let message = MarketMessage::Sale(sale());
        let envelope = Envelope::seal(AgentId::from("buyer-7"), AgentId::from("seller-1"), &message).unwrap();
        assert_eq!(envelope.open(), Some(message));
        assert_eq!(MarketMessage::request().kind(), "Peticion_Cliente");
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(body in proptest::collection::vec(proptest::num::u8::ANY, 0..256)) {
            let envelope = Envelope {
                from: AgentId::from("a"),
                to: AgentId::from("b"),
                body,
            };
            let _ = envelope.open();
        }
    }
}
