use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;

/// 调度指标收集器
///
/// 按提供商和模型统计调度次数、成功/失败数和延迟。
/// 流式调用的延迟只计到流建立为止。
#[derive(Debug, Clone)]
pub struct DispatchMetrics {
    request_count: Arc<AtomicU64>,
    success_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    /// 已建立的流式调用数
    streams_opened: Arc<AtomicU64>,
    /// 被演示适配器处理的调用数
    demo_requests: Arc<AtomicU64>,
    provider_metrics: Arc<RwLock<HashMap<String, RouteMetrics>>>,
    model_metrics: Arc<RwLock<HashMap<String, RouteMetrics>>>,
    start_time: Instant,
}

/// Counters for one provider or one wire model
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_latency_ms: f64,
    pub last_request_time: Option<String>,
}

impl RouteMetrics {
    fn record(&mut self, success: bool, latency_ms: u64) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }

        let total_latency =
            (self.avg_latency_ms * (self.total_requests - 1) as f64) + latency_ms as f64;
        self.avg_latency_ms = total_latency / self.total_requests as f64;
        self.last_request_time = Some(chrono::Utc::now().to_rfc3339());
    }
}

/// Point-in-time view of [`DispatchMetrics`]
#[derive(Debug, Serialize)]
pub struct MetricsSummary {
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub streams_opened: u64,
    pub demo_requests: u64,
    pub success_rate_percent: f64,
    pub provider_metrics: HashMap<String, RouteMetrics>,
    pub model_metrics: HashMap<String, RouteMetrics>,
    pub timestamp: String,
}

/// Outcome of one dispatch, as seen by the metrics layer
#[derive(Debug, Clone, Copy)]
pub struct DispatchRecord<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub success: bool,
    pub streaming: bool,
    pub demo: bool,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            success_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            streams_opened: Arc::new(AtomicU64::new(0)),
            demo_requests: Arc::new(AtomicU64::new(0)),
            provider_metrics: Arc::new(RwLock::new(HashMap::new())),
            model_metrics: Arc::new(RwLock::new(HashMap::new())),
            start_time: Instant::now(),
        }
    }

    /// 记录调度开始
    ///
    /// ## 返回值
    /// - `Instant`: 开始时间，传给 [`DispatchMetrics::record_dispatch_end`]
    pub fn record_dispatch_start(&self) -> Instant {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        Instant::now()
    }

    /// 记录调度结束
    ///
    /// ## 执行例子
    /// ```rust,ignore
    /// let start = metrics.record_dispatch_start();
    /// // ... 调用提供商 ...
    /// metrics.record_dispatch_end(start, DispatchRecord { provider: "openai", model: "gpt-4o-mini", success: true, streaming: false, demo: false }).await;
    /// ```
    pub async fn record_dispatch_end(&self, start_time: Instant, record: DispatchRecord<'_>) {
        let latency_ms = start_time.elapsed().as_millis() as u64;

        if record.success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
            if record.streaming {
                self.streams_opened.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }

        if record.demo {
            self.demo_requests.fetch_add(1, Ordering::Relaxed);
        }

        self.provider_metrics
            .write()
            .await
            .entry(record.provider.to_string())
            .or_default()
            .record(record.success, latency_ms);

        self.model_metrics
            .write()
            .await
            .entry(record.model.to_string())
            .or_default()
            .record(record.success, latency_ms);
    }

    /// Failure that happened before any provider was chosen
    pub fn record_rejected(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn summary(&self) -> MetricsSummary {
        let total_requests = self.request_count.load(Ordering::Relaxed);
        let successful_requests = self.success_count.load(Ordering::Relaxed);

        let success_rate_percent = if total_requests > 0 {
            (successful_requests as f64 / total_requests as f64) * 100.0
        } else {
            0.0
        };

        MetricsSummary {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            total_requests,
            successful_requests,
            failed_requests: self.error_count.load(Ordering::Relaxed),
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            demo_requests: self.demo_requests.load(Ordering::Relaxed),
            success_rate_percent,
            provider_metrics: self.provider_metrics.read().await.clone(),
            model_metrics: self.model_metrics.read().await.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// (总请求数, 成功请求数, 失败请求数)
    pub fn basic_stats(&self) -> (u64, u64, u64) {
        (
            self.request_count.load(Ordering::Relaxed),
            self.success_count.load(Ordering::Relaxed),
            self.error_count.load(Ordering::Relaxed),
        )
    }
}
