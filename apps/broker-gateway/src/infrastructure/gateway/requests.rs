//! Typed gateway operations.
//!
//! Each operation is a request struct implementing [`GatewayRequest`], which
//! fixes its kind, its outbound vendor form and the shape of its reply. A
//! reply of the wrong shape is a protocol fault and surfaces as `Unknown`.

use crate::application::ports::{VendorRequest, VendorResponse};
use crate::domain::{
    AccountSummary, ClientRef, OrderId, OrderLookup, OrderSpec, OrderStatusReport, OrderUpdate,
    Position, Quote, RequestKind, Symbol,
};
use crate::error::GatewayError;

/// One typed gateway operation.
pub trait GatewayRequest: Send {
    /// Decoded reply.
    type Output: Send;

    /// Operation kind.
    const KIND: RequestKind;

    /// Order this request concerns, tracked while it is in flight.
    fn client_ref(&self) -> Option<ClientRef> {
        None
    }

    /// Outbound vendor form.
    fn into_vendor(self) -> VendorRequest;

    /// Decode the vendor reply.
    ///
    /// # Errors
    ///
    /// `Unknown` if the reply does not match this operation.
    fn decode(response: VendorResponse) -> Result<Self::Output, GatewayError>;
}

fn unexpected(kind: RequestKind, response: &VendorResponse) -> GatewayError {
    GatewayError::unknown(format!(
        "unexpected {} reply to {kind} request",
        response.name()
    ))
}

/// Account summary query.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountQuery;

impl GatewayRequest for AccountQuery {
    type Output = AccountSummary;
    const KIND: RequestKind = RequestKind::AccountQuery;

    fn into_vendor(self) -> VendorRequest {
        VendorRequest::AccountSummary
    }

    fn decode(response: VendorResponse) -> Result<Self::Output, GatewayError> {
        match response {
            VendorResponse::Account(account) => Ok(account),
            other => Err(unexpected(Self::KIND, &other)),
        }
    }
}

/// Open positions query.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionsQuery;

impl GatewayRequest for PositionsQuery {
    type Output = Vec<Position>;
    const KIND: RequestKind = RequestKind::PositionsQuery;

    fn into_vendor(self) -> VendorRequest {
        VendorRequest::Positions
    }

    fn decode(response: VendorResponse) -> Result<Self::Output, GatewayError> {
        match response {
            VendorResponse::Positions(positions) => Ok(positions),
            other => Err(unexpected(Self::KIND, &other)),
        }
    }
}

/// Order submission. The reply is the vendor's acknowledgement.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    /// Local reference of the tracked order.
    pub client_ref: ClientRef,
    /// What to trade.
    pub spec: OrderSpec,
}

impl GatewayRequest for PlaceOrder {
    type Output = OrderUpdate;
    const KIND: RequestKind = RequestKind::PlaceOrder;

    fn client_ref(&self) -> Option<ClientRef> {
        Some(self.client_ref.clone())
    }

    fn into_vendor(self) -> VendorRequest {
        VendorRequest::PlaceOrder {
            client_ref: self.client_ref,
            spec: self.spec,
        }
    }

    fn decode(response: VendorResponse) -> Result<Self::Output, GatewayError> {
        match response {
            VendorResponse::OrderAck(ack) => Ok(ack),
            other => Err(unexpected(Self::KIND, &other)),
        }
    }
}

/// Cancel request. Success means the vendor accepted the request, not that
/// the order is cancelled.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    /// Vendor order ID.
    pub order_id: OrderId,
}

impl GatewayRequest for CancelOrder {
    type Output = OrderId;
    const KIND: RequestKind = RequestKind::CancelOrder;

    fn into_vendor(self) -> VendorRequest {
        VendorRequest::CancelOrder {
            order_id: self.order_id,
        }
    }

    fn decode(response: VendorResponse) -> Result<Self::Output, GatewayError> {
        match response {
            VendorResponse::CancelAck { order_id } => Ok(order_id),
            other => Err(unexpected(Self::KIND, &other)),
        }
    }
}

/// Single order status query.
#[derive(Debug, Clone)]
pub struct OrderStatusQuery {
    /// Order to look up.
    pub lookup: OrderLookup,
}

impl GatewayRequest for OrderStatusQuery {
    type Output = OrderStatusReport;
    const KIND: RequestKind = RequestKind::OrderStatus;

    fn into_vendor(self) -> VendorRequest {
        VendorRequest::OrderStatus {
            lookup: self.lookup,
        }
    }

    fn decode(response: VendorResponse) -> Result<Self::Output, GatewayError> {
        match response {
            VendorResponse::OrderStatus(report) => Ok(report),
            other => Err(unexpected(Self::KIND, &other)),
        }
    }
}

/// Quote snapshot query.
#[derive(Debug, Clone)]
pub struct MarketQuote {
    /// Symbol to quote.
    pub symbol: Symbol,
}

impl GatewayRequest for MarketQuote {
    type Output = Quote;
    const KIND: RequestKind = RequestKind::MarketQuote;

    fn into_vendor(self) -> VendorRequest {
        VendorRequest::MarketQuote {
            symbol: self.symbol,
        }
    }

    fn decode(response: VendorResponse) -> Result<Self::Output, GatewayError> {
        match response {
            VendorResponse::Quote(quote) => Ok(quote),
            other => Err(unexpected(Self::KIND, &other)),
        }
    }
}

/// Query for every order the vendor considers open.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOrdersQuery;

impl GatewayRequest for OpenOrdersQuery {
    type Output = Vec<OrderStatusReport>;
    const KIND: RequestKind = RequestKind::OpenOrders;

    fn into_vendor(self) -> VendorRequest {
        VendorRequest::OpenOrders
    }

    fn decode(response: VendorResponse) -> Result<Self::Output, GatewayError> {
        match response {
            VendorResponse::OpenOrders(reports) => Ok(reports),
            other => Err(unexpected(Self::KIND, &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::OrderSide;

    #[test]
    fn kinds_match_vendor_form() {
        assert_eq!(AccountQuery.into_vendor().kind(), AccountQuery::KIND);
        assert_eq!(OpenOrdersQuery.into_vendor().kind(), OpenOrdersQuery::KIND);

        let place = PlaceOrder {
            client_ref: ClientRef::new("c-1"),
            spec: OrderSpec::market("AAPL", OrderSide::Buy, dec!(1)),
        };
        assert_eq!(place.client_ref(), Some(ClientRef::new("c-1")));
        assert_eq!(place.into_vendor().kind(), RequestKind::PlaceOrder);

        let quote = MarketQuote {
            symbol: Symbol::new("msft"),
        };
        assert_eq!(quote.client_ref(), None);
        assert_eq!(quote.into_vendor().kind(), RequestKind::MarketQuote);
    }

    #[test]
    fn mismatched_reply_is_unknown() {
        let err = PositionsQuery::decode(VendorResponse::OpenOrders(Vec::new())).unwrap_err();
        assert_eq!(
            err,
            GatewayError::unknown("unexpected open_orders reply to positions_query request")
        );

        let order_id = CancelOrder::decode(VendorResponse::CancelAck {
            order_id: OrderId::new("SIM-9"),
        })
        .unwrap();
        assert_eq!(order_id, OrderId::new("SIM-9"));
    }
}
