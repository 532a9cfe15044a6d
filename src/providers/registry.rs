use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::RwLock;

use crate::{
    config::{DispatchConfig, ProviderDetail},
    errors::AppError,
    providers::{
        Provider,
        anthropic::AnthropicProvider,
        mock::{MockFlavour, MockProvider},
        openai::OpenAIProvider,
        types::ModelDescriptor,
    },
    store::{CredentialRecord, CredentialStore},
};

/// Secrets that are known to be samples rather than real keys
const PLACEHOLDER_KEYS: &[&str] = &[
    "sk-demo-key-placeholder",
    "sk-ant-REDACTED",
    "your-openai-api-key",
    "your-anthropic-api-key",
    "demo",
    "placeholder",
    "",
];

const PLACEHOLDER_FRAGMENTS: &[&str] = &["demo", "test", "placeholder", "your-"];

const MIN_KEY_LEN: usize = 10;

/// 判断凭据是否为示例/占位密钥
///
/// ## 判定规则
/// 1. 与已知占位符完全相等
/// 2. 不区分大小写包含 `demo`、`test`、`placeholder`、`your-`
/// 3. 长度小于10
pub fn is_placeholder_key(key: &str) -> bool {
    if PLACEHOLDER_KEYS.contains(&key) {
        return true;
    }

    let lower = key.to_lowercase();
    PLACEHOLDER_FRAGMENTS.iter().any(|f| lower.contains(f)) || key.len() < MIN_KEY_LEN
}

/// Builds provider instances from credential records
#[derive(Clone)]
pub struct ProviderFactory {
    client: Client,
    timeout_seconds: u64,
    stream_timeout_seconds: u64,
    mock_delay: Option<Duration>,
}

impl ProviderFactory {
    pub fn new(client: Client, dispatch: &DispatchConfig) -> Self {
        Self {
            client,
            timeout_seconds: dispatch.chat_timeout_seconds,
            stream_timeout_seconds: dispatch.stream_setup_timeout_seconds,
            mock_delay: dispatch.mock_delay_ms.map(Duration::from_millis),
        }
    }

    /// Factory using a fresh HTTP client
    ///
    /// No client-wide timeout is set: blocking calls and stream setup are
    /// bounded per call, and an open stream must be allowed to run long.
    pub fn from_config(dispatch: &DispatchConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::new(client, dispatch))
    }

    /// Instantiate the adapter a credential asks for
    ///
    /// Returns `None` for vendors without an adapter.
    pub fn create(&self, record: &CredentialRecord) -> Option<Arc<dyn Provider>> {
        let provider = record.provider.to_lowercase();
        let base = |default: &str| {
            record
                .api_url
                .as_deref()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(default)
                .to_string()
        };

        match provider.as_str() {
            OpenAIProvider::NAME => Some(Arc::new(OpenAIProvider::new(
                self.detail(&record.value, base(OpenAIProvider::DEFAULT_API_BASE)),
                self.client.clone(),
            ))),
            AnthropicProvider::NAME => Some(Arc::new(AnthropicProvider::new(
                self.detail(&record.value, base(AnthropicProvider::DEFAULT_API_BASE)),
                self.client.clone(),
            ))),
            _ => None,
        }
    }

    pub fn mock(&self, flavour: MockFlavour) -> Arc<dyn Provider> {
        let provider = MockProvider::new(flavour);
        match self.mock_delay {
            Some(delay) => Arc::new(provider.with_delay(delay)),
            None => Arc::new(provider),
        }
    }

    fn detail(&self, api_key: &str, api_base: String) -> ProviderDetail {
        ProviderDetail {
            api_key: api_key.to_string(),
            api_base,
            timeout_seconds: self.timeout_seconds,
            stream_timeout_seconds: self.stream_timeout_seconds,
        }
    }
}

/// Immutable snapshot of registered providers
///
/// Requests keep using the snapshot they started with even if a reload
/// swaps in a new one midway.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderSet {
    /// 根据凭据记录构建提供商集合
    ///
    /// ## 内部实现逻辑
    /// 1. 跳过禁用的凭据
    /// 2. 跳过占位密钥（见 [`is_placeholder_key`]），仅记录debug日志
    /// 3. 按小写提供商名创建适配器，未知提供商记录warn并跳过
    /// 4. 同名提供商后写入者覆盖先写入者
    /// 5. 若没有任何真实提供商，安装openai与anthropic两个演示适配器
    pub fn from_records(factory: &ProviderFactory, records: &[CredentialRecord]) -> Self {
        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();

        for record in records {
            if !record.enabled {
                tracing::debug!(credential = %record.id, "Skipping disabled credential");
                continue;
            }

            if is_placeholder_key(&record.value) {
                tracing::debug!(credential = %record.id, provider = %record.provider, "Skipping placeholder credential");
                continue;
            }

            match factory.create(record) {
                Some(provider) => {
                    tracing::info!(credential = %record.id, provider = provider.name(), "Registered provider");
                    providers.insert(provider.name().to_string(), provider);
                }
                None => {
                    tracing::warn!(credential = %record.id, provider = %record.provider, "Unsupported provider type, skipping credential");
                }
            }
        }

        if providers.is_empty() {
            tracing::warn!("No usable credentials found, installing demo providers");
            for flavour in [MockFlavour::OpenAI, MockFlavour::Anthropic] {
                providers.insert(flavour.name().to_string(), factory.mock(flavour));
            }
        }

        Self { providers }
    }

    /// Set made of exactly the given providers
    pub fn with_providers(providers: impl IntoIterator<Item = Arc<dyn Provider>>) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.name().to_string(), p))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered names in lexicographic order
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_real_providers(&self) -> bool {
        self.providers.values().any(|p| !p.is_demo())
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Built-in model lists of every provider, grouped by provider name
    pub fn all_models(&self) -> BTreeMap<String, Vec<ModelDescriptor>> {
        self.providers
            .iter()
            .map(|(name, p)| (name.clone(), p.get_models()))
            .collect()
    }
}

/// Credential-driven provider registry with atomic reload
pub struct ProviderRegistry {
    factory: ProviderFactory,
    credentials: Arc<dyn CredentialStore>,
    current: RwLock<Arc<ProviderSet>>,
}

impl ProviderRegistry {
    /// 从凭据存储构建注册表
    ///
    /// ## 返回值
    /// - `Ok(ProviderRegistry)`: 构建成功（可能只含演示适配器）
    /// - `Err(AppError::Configuration)`: 无法读取凭据存储
    pub async fn build(
        factory: ProviderFactory,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, AppError> {
        let set = Self::load(&factory, credentials.as_ref()).await?;
        Ok(Self {
            factory,
            credentials,
            current: RwLock::new(Arc::new(set)),
        })
    }

    /// Rebuild from the credential store and swap the result in
    ///
    /// On failure the previous set stays active.
    pub async fn reload(&self) -> Result<(), AppError> {
        let set = Self::load(&self.factory, self.credentials.as_ref()).await?;
        tracing::info!(providers = ?set.provider_names(), real = set.has_real_providers(), "Provider registry reloaded");
        self.install(set).await;
        Ok(())
    }

    /// Replace the active set
    pub async fn install(&self, set: ProviderSet) {
        *self.current.write().await = Arc::new(set);
    }

    /// The set currently serving requests
    pub async fn snapshot(&self) -> Arc<ProviderSet> {
        self.current.read().await.clone()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.snapshot().await.get(name)
    }

    pub async fn provider_names(&self) -> Vec<String> {
        self.snapshot().await.provider_names()
    }

    pub async fn has_real_providers(&self) -> bool {
        self.snapshot().await.has_real_providers()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshot().await.is_empty()
    }

    pub async fn all_models(&self) -> BTreeMap<String, Vec<ModelDescriptor>> {
        self.snapshot().await.all_models()
    }

    async fn load(
        factory: &ProviderFactory,
        credentials: &dyn CredentialStore,
    ) -> Result<ProviderSet, AppError> {
        let records = credentials
            .list_credentials()
            .await
            .map_err(|e| AppError::configuration(format!("Failed to load credentials: {:#}", e)))?;
        Ok(ProviderSet::from_records(factory, &records))
    }
}
