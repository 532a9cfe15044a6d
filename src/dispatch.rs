//! Model resolution plus provider invocation.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, DispatchConfig},
    errors::{AppError, AppResult},
    metrics::{DispatchMetrics, DispatchRecord},
    providers::{
        ChatStream, Provider, ProviderFactory, ProviderRegistry, ProviderSet,
        types::{ChatRequest, ChatResponse, ModelDescriptor},
    },
    resolver::{ModelResolver, Resolution},
    store::{CredentialStore, ModelCatalog},
};

/// Entry point for chat completions
///
/// Owns the provider registry; every call works on the registry snapshot
/// taken when it started.
pub struct ChatDispatchService {
    registry: ProviderRegistry,
    resolver: ModelResolver,
    metrics: DispatchMetrics,
    allow_demo_providers: bool,
    default_max_tokens: Option<u32>,
}

impl ChatDispatchService {
    pub fn new(registry: ProviderRegistry, resolver: ModelResolver, dispatch: &DispatchConfig) -> Self {
        Self {
            registry,
            resolver,
            metrics: DispatchMetrics::new(),
            allow_demo_providers: dispatch.allow_demo_providers,
            default_max_tokens: dispatch.default_max_tokens,
        }
    }

    /// 根据配置和外部协作者构建调度服务
    ///
    /// ## 内部实现逻辑
    /// 1. 创建共享HTTP客户端和提供商工厂
    /// 2. 从凭据存储构建提供商注册表
    /// 3. 创建使用模型目录的解析器
    pub async fn from_config(
        config: &Config,
        catalog: Arc<dyn ModelCatalog>,
        credentials: Arc<dyn CredentialStore>,
    ) -> AppResult<Self> {
        let factory = ProviderFactory::from_config(&config.dispatch)?;
        let registry = ProviderRegistry::build(factory, credentials).await?;
        let resolver = ModelResolver::new(catalog, config.resolution.clone());

        tracing::info!(
            providers = ?registry.provider_names().await,
            real = registry.has_real_providers().await,
            "Chat dispatch service initialized"
        );

        Ok(Self::new(registry, resolver, &config.dispatch))
    }

    /// Execute a blocking completion
    pub async fn chat(&self, cancel: &CancellationToken, request: ChatRequest) -> AppResult<ChatResponse> {
        let start = self.metrics.record_dispatch_start();
        let (provider, resolution, request) = match self.route(request).await {
            Ok(routed) => routed,
            Err(e) => {
                self.metrics.record_rejected();
                return Err(e);
            }
        };

        tracing::debug!(
            provider = %resolution.provider,
            model = %resolution.wire_model,
            conversation_id = %request.conversation_id,
            "Dispatching chat"
        );

        let result = provider.chat(cancel, request).await;
        self.metrics
            .record_dispatch_end(start, self.record(&resolution, provider.as_ref(), result.is_ok(), false))
            .await;

        if let Err(e) = &result {
            tracing::warn!(provider = %resolution.provider, model = %resolution.wire_model, "Chat failed: {}", e);
        }
        result
    }

    /// Start a streamed completion
    ///
    /// Errors returned here are setup failures; later failures arrive as an
    /// error terminal event on the stream.
    pub async fn stream_chat(&self, cancel: CancellationToken, request: ChatRequest) -> AppResult<ChatStream> {
        let start = self.metrics.record_dispatch_start();
        let (provider, resolution, mut request) = match self.route(request).await {
            Ok(routed) => routed,
            Err(e) => {
                self.metrics.record_rejected();
                return Err(e);
            }
        };
        request.stream = true;

        tracing::debug!(
            provider = %resolution.provider,
            model = %resolution.wire_model,
            conversation_id = %request.conversation_id,
            "Dispatching stream"
        );

        let result = provider.stream_chat(cancel, request).await;
        self.metrics
            .record_dispatch_end(start, self.record(&resolution, provider.as_ref(), result.is_ok(), true))
            .await;

        if let Err(e) = &result {
            tracing::warn!(provider = %resolution.provider, model = %resolution.wire_model, "Stream setup failed: {}", e);
        }
        result
    }

    /// Catalog models that can currently be served
    pub async fn get_models(&self) -> AppResult<Vec<ModelDescriptor>> {
        let snapshot = self.registry.snapshot().await;
        let models = self.resolver.routable_models(&snapshot).await?;

        Ok(models
            .into_iter()
            .map(|m| ModelDescriptor {
                name: if m.name.is_empty() { m.value.clone() } else { m.name },
                id: m.id,
                provider: m.provider.to_lowercase(),
                capabilities: vec!["text".to_string(), "chat".to_string()],
                max_tokens: m.max_tokens,
                enabled: m.enabled,
            })
            .collect())
    }

    /// Built-in model lists of the registered adapters
    pub async fn provider_models(&self) -> BTreeMap<String, Vec<ModelDescriptor>> {
        self.registry.all_models().await
    }

    /// Rebuild the registry from the credential store
    pub async fn reload(&self) -> AppResult<()> {
        self.registry.reload().await
    }

    pub async fn has_real_providers(&self) -> bool {
        self.registry.has_real_providers().await
    }

    pub async fn provider_names(&self) -> Vec<String> {
        self.registry.provider_names().await
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    /// Check that `model` can be served right now, without any network call
    ///
    /// Runs the demo-mode gate and model resolution against the current
    /// registry snapshot. Callers use it to fail before writing anything.
    pub async fn preflight(&self, model: &str) -> AppResult<Resolution> {
        let snapshot = self.registry.snapshot().await;
        self.select(model, &snapshot).await.map(|(_, resolution)| resolution)
    }

    /// 选择提供商并改写请求
    ///
    /// ## 内部实现逻辑
    /// 1. 验证请求参数
    /// 2. 未开启演示模式且没有真实提供商时返回配置错误
    /// 3. 解析模型引用，改写为线上模型名
    /// 4. 填充默认`max_tokens`
    ///
    /// 以上步骤都不会发起网络调用
    async fn route(&self, mut request: ChatRequest) -> AppResult<(Arc<dyn Provider>, Resolution, ChatRequest)> {
        request.validate().map_err(AppError::Validation)?;

        let snapshot = self.registry.snapshot().await;
        let (provider, resolution) = self.select(&request.model, &snapshot).await?;

        request.model = resolution.wire_model.clone();
        if request.max_tokens.is_none() {
            request.max_tokens = self.default_max_tokens;
        }

        Ok((provider, resolution, request))
    }

    async fn select(&self, model: &str, snapshot: &ProviderSet) -> AppResult<(Arc<dyn Provider>, Resolution)> {
        if !self.allow_demo_providers && !snapshot.has_real_providers() {
            return Err(AppError::configuration(
                "No LLM provider is configured; add a real API key credential or enable demo providers",
            ));
        }

        let resolution = self.resolver.resolve(model, snapshot).await?;
        let provider = snapshot.get(&resolution.provider).ok_or_else(|| {
            AppError::resolution(format!("Provider '{}' is not registered", resolution.provider))
        })?;

        Ok((provider, resolution))
    }

    fn record<'a>(
        &self,
        resolution: &'a Resolution,
        provider: &dyn Provider,
        success: bool,
        streaming: bool,
    ) -> DispatchRecord<'a> {
        DispatchRecord {
            provider: &resolution.provider,
            model: &resolution.wire_model,
            success,
            streaming,
            demo: provider.is_demo(),
        }
    }
}
