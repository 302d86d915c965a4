// =============================================================================
// Pipeline — fetch → aggregate for one exchange
// =============================================================================

use tracing::{info, warn};

use crate::aggregator::{aggregate, AggregationRules, Summary};
use crate::config::Credentials;
use crate::error::Result;
use crate::exchange::ExchangeClient;
use crate::report::ReportContext;
use crate::types::{AccountBalance, Exchange, PositionRecord};

/// Result of one fetch/aggregate pass.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub exchange: Exchange,
    pub summary: Summary,
    /// `None` when the balance endpoint failed; positions are still reported.
    pub balance: Option<AccountBalance>,
}

impl Analysis {
    pub fn from_records(
        exchange: Exchange,
        records: &[PositionRecord],
        balance: Option<AccountBalance>,
        rules: &AggregationRules,
    ) -> Self {
        Self {
            exchange,
            summary: aggregate(records, rules),
            balance,
        }
    }

    pub fn context<'a>(&'a self, rules: &'a AggregationRules) -> ReportContext<'a> {
        ReportContext {
            exchange: self.exchange,
            summary: &self.summary,
            rules,
            balance: self.balance.as_ref(),
        }
    }
}

/// Fetch positions and balance through `client` and aggregate them.
///
/// Position failures propagate; a balance failure is logged and dropped.
pub async fn analyse(client: &ExchangeClient, rules: &AggregationRules) -> Result<Analysis> {
    let exchange = client.exchange();

    info!(exchange = %exchange, "fetching positions");
    let records = client.fetch_positions().await?;
    info!(exchange = %exchange, count = records.len(), "positions fetched");

    let balance = match client.fetch_balance().await {
        Ok(b) => Some(b),
        Err(e) => {
            warn!(exchange = %exchange, error = %e, "balance fetch failed, reporting positions only");
            None
        }
    };

    let analysis = Analysis::from_records(exchange, &records, balance, rules);
    info!(
        exchange = %exchange,
        symbols = analysis.summary.positions.len(),
        excluded = analysis.summary.excluded_count,
        ratio = %analysis.summary.ratio,
        "aggregation complete"
    );
    Ok(analysis)
}

/// Connect to `exchange` with the configured credentials and analyse it.
pub async fn run(
    exchange: Exchange,
    credentials: &Credentials,
    rules: &AggregationRules,
) -> Result<Analysis> {
    let client = ExchangeClient::connect(exchange, credentials)?;
    analyse(&client, rules).await
}
