//! Live execution: routes orders to the pair's exchange gateway.

use super::slippage::slippage_percent;
use super::ExecutionError;
use crate::event::{DataEvent, FillEvent, OrderEvent};
use crate::gateway::{GatewayError, GatewayRegistry, OrderRequest};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct LiveExecutionAdapter {
    gateways: GatewayRegistry,
}

impl LiveExecutionAdapter {
    pub fn new(gateways: GatewayRegistry) -> Self {
        Self { gateways }
    }

    /// Submit `order` and build the fill from the exchange acknowledgement.
    ///
    /// Slippage is measured against the order book mid price before
    /// submission. An acknowledgement with nothing filled is cancelled and
    /// reported as insufficient liquidity.
    pub async fn execute(&self, order: &OrderEvent, data: &DataEvent) -> Result<FillEvent, ExecutionError> {
        let gateway = self
            .gateways
            .get(&order.key.exchange)
            .ok_or_else(|| GatewayError::NotFound(format!("no gateway for {}", order.key.exchange)))?;

        let book = gateway.fetch_orderbook(&order.key).await?;
        let reference = book
            .mid_price()
            .unwrap_or(if order.price > 0.0 { order.price } else { data.close_price() });

        let request = OrderRequest {
            key: order.key.clone(),
            direction: order.direction,
            kind: order.kind,
            price: if order.price > 0.0 { order.price } else { reference },
            amount: order.amount,
            leverage: order.leverage,
            reduce_only: order.closing_position || order.liquidation,
        };
        let ack = gateway.submit_order(&request).await?;

        if ack.amount <= 0.0 {
            warn!(key = %order.key, order_id = %ack.order_id, "order acknowledged with nothing filled");
            gateway.cancel_order(&order.key, &ack.order_id).await?;
            return Err(ExecutionError::InsufficientLiquidity(format!(
                "{}: exchange filled nothing",
                order.key
            )));
        }

        let mut fill = FillEvent::from_order(order, ack.price, ack.amount, ack.fee);
        fill.slippage_percent = slippage_percent(reference, ack.price);
        fill.exchange_order_id = Some(ack.order_id);
        debug!(key = %fill.key, price = fill.price, amount = fill.amount, "live fill");
        Ok(fill)
    }
}
