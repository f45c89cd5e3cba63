use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use common::{Error, MarketFeed, PriceObservation, Result, Snapshot};

const COINBASE_SPOT_URL: &str = "https://api.coinbase.com/v2/prices/BTC-USD/spot";
const OKX_BASE_URL: &str = "https://www.okx.com";
const INST_ID: &str = "BTC-USDT-SWAP";
const BAR: &str = "15m";
const PAGE_LIMIT: usize = 100;
const MAX_PAGES: usize = 12;
const PAGE_PAUSE: Duration = Duration::from_millis(150);
const USER_AGENT: &str = "btc-journal-bot/1.0";

/// Unauthenticated client for the public Coinbase and OKX endpoints.
pub struct PublicFeed {
    http: Client,
}

impl PublicFeed {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Feed(format!("HTTP {status} from {url}: {body}")));
        }
        serde_json::from_str(&body).map_err(|e| Error::Feed(format!("unexpected payload from {url}: {e}")))
    }

    pub async fn spot_price(&self) -> Result<f64> {
        let resp: CoinbaseSpot = self.get_json(COINBASE_SPOT_URL, &[]).await?;
        parse_spot(resp)
    }

    /// Current funding rate of the BTC perpetual; `None` when the exchange
    /// reports an empty rate.
    pub async fn funding_rate(&self) -> Result<Option<f64>> {
        let url = format!("{OKX_BASE_URL}/api/v5/public/funding-rate");
        let resp: OkxResponse<FundingRow> = self
            .get_json(&url, &[("instId", INST_ID.to_string())])
            .await?;
        parse_funding(resp)
    }

    /// 15-minute bars opening within `[from, to]`, oldest first.
    ///
    /// The exchange pages newest-first, so this walks backwards with the
    /// `after` cursor until the page reaches `from` or the page cap is hit.
    pub async fn candles(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<PriceObservation>> {
        let url = format!("{OKX_BASE_URL}/api/v5/market/candles");
        let (from_ms, to_ms) = (from.timestamp_millis(), to.timestamp_millis());

        let mut bars: BTreeMap<i64, PriceObservation> = BTreeMap::new();
        let mut after: Option<i64> = None;
        let mut covered = false;

        for page in 0..MAX_PAGES {
            if page > 0 {
                tokio::time::sleep(PAGE_PAUSE).await;
            }
            let mut query = vec![
                ("instId", INST_ID.to_string()),
                ("bar", BAR.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(cursor) = after {
                query.push(("after", cursor.to_string()));
            }

            let resp: OkxResponse<Vec<String>> = self.get_json(&url, &query).await?;
            let rows = parse_candles(resp)?;
            let Some(oldest) = rows.last().map(|(ts, _)| *ts) else {
                break;
            };
            debug!(page, rows = rows.len(), oldest, "Fetched candle page");

            for (ts, bar) in rows {
                if (from_ms..=to_ms).contains(&ts) {
                    bars.insert(ts, bar);
                }
            }
            if oldest <= from_ms {
                covered = true;
                break;
            }
            after = Some(oldest);
        }

        if !covered {
            warn!(%from, bars = bars.len(), "Candle history did not reach the start of the window");
        }
        info!(%from, %to, bars = bars.len(), "Price path fetched");
        Ok(bars.into_values().collect())
    }
}

#[async_trait]
impl MarketFeed for PublicFeed {
    async fn snapshot(&self, date: NaiveDate) -> Result<Snapshot> {
        let spot_price = self.spot_price().await?;
        let funding_rate = self.funding_rate().await?;
        info!(%date, spot_price, ?funding_rate, "Market snapshot taken");
        Ok(Snapshot {
            date,
            spot_price,
            funding_rate,
            timestamp: Utc::now(),
        })
    }

    async fn price_path(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<PriceObservation>> {
        self.candles(from, to).await
    }
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CoinbaseSpot {
    data: CoinbaseAmount,
}

#[derive(Deserialize)]
struct CoinbaseAmount {
    amount: String,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct OkxResponse<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingRow {
    #[serde(default)]
    funding_rate: String,
}

fn parse_spot(resp: CoinbaseSpot) -> Result<f64> {
    resp.data
        .amount
        .parse::<f64>()
        .map_err(|e| Error::Feed(format!("bad spot amount '{}': {e}", resp.data.amount)))
}

fn okx_data<T>(resp: OkxResponse<T>) -> Result<Vec<T>> {
    if resp.code != "0" {
        return Err(Error::Feed(format!("OKX error {}: {}", resp.code, resp.msg)));
    }
    Ok(resp.data)
}

fn parse_funding(resp: OkxResponse<FundingRow>) -> Result<Option<f64>> {
    let Some(row) = okx_data(resp)?.into_iter().next() else {
        return Err(Error::Feed("funding response has no rows".into()));
    };
    let raw = row.funding_rate.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|e| Error::Feed(format!("bad funding rate '{raw}': {e}")))
}

/// Rows are `[ts, open, high, low, close, ...]` as strings, newest first.
fn parse_candles(resp: OkxResponse<Vec<String>>) -> Result<Vec<(i64, PriceObservation)>> {
    okx_data(resp)?.iter().map(|row| parse_candle(row)).collect()
}

fn parse_candle(row: &[String]) -> Result<(i64, PriceObservation)> {
    if row.len() < 5 {
        return Err(Error::Feed(format!("short candle row: {row:?}")));
    }
    let num = |i: usize| {
        row[i]
            .parse::<f64>()
            .map_err(|e| Error::Feed(format!("bad candle field '{}': {e}", row[i])))
    };
    let ts: i64 = row[0]
        .parse()
        .map_err(|e| Error::Feed(format!("bad candle timestamp '{}': {e}", row[0])))?;
    let at = Utc
        .timestamp_millis_opt(ts)
        .single()
        .ok_or_else(|| Error::Feed(format!("candle timestamp out of range: {ts}")))?;
    Ok((
        ts,
        PriceObservation {
            at,
            high: num(2)?,
            low: num(3)?,
            close: num(4)?,
        },
    ))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
