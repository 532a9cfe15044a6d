//! Maps model references onto registered providers.

use std::sync::Arc;

use crate::{
    config::ResolutionConfig,
    errors::AppError,
    providers::ProviderSet,
    store::{CatalogModel, ModelCatalog},
};

/// Where a model reference is routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Registry key of the provider
    pub provider: String,
    /// Model name sent to the vendor
    pub wire_model: String,
    /// Catalog entry that matched, `None` for a fallback route
    pub catalog_id: Option<String>,
}

impl Resolution {
    pub fn is_fallback(&self) -> bool {
        self.catalog_id.is_none()
    }
}

pub struct ModelResolver {
    catalog: Arc<dyn ModelCatalog>,
    config: ResolutionConfig,
}

impl ModelResolver {
    pub fn new(catalog: Arc<dyn ModelCatalog>, config: ResolutionConfig) -> Self {
        Self { catalog, config }
    }

    /// Resolve `reference` against the live catalog and `providers`
    pub async fn resolve(&self, reference: &str, providers: &ProviderSet) -> Result<Resolution, AppError> {
        let models = self
            .catalog
            .list_models()
            .await
            .map_err(|e| AppError::internal(format!("Failed to load model catalog: {:#}", e)))?;

        resolve_reference(reference, &models, providers, &self.config)
    }

    /// Enabled catalog entries whose provider is currently registered
    pub async fn routable_models(&self, providers: &ProviderSet) -> Result<Vec<CatalogModel>, AppError> {
        let models = self
            .catalog
            .list_models()
            .await
            .map_err(|e| AppError::internal(format!("Failed to load model catalog: {:#}", e)))?;

        Ok(models
            .into_iter()
            .filter(|m| m.enabled && providers.contains(&m.provider.to_lowercase()))
            .collect())
    }
}

/// 将模型引用解析为（提供商，线上模型名）
///
/// ## 匹配策略
/// 1. **目录匹配**: 引用等于条目的`id`或`value`，且条目已启用；首个匹配生效。
///    匹配条目的提供商未注册时返回 `Resolution` 错误
/// 2. **已禁用**: 引用只匹配到禁用条目时返回 `Resolution` 错误，不进入回退
/// 3. **严格模式**: 无匹配时直接返回 `Resolution` 错误
/// 4. **回退**: 使用已注册的`fallback_provider`，否则使用字典序最小的已注册提供商，
///    模型引用原样作为线上模型名
pub fn resolve_reference(
    reference: &str,
    models: &[CatalogModel],
    providers: &ProviderSet,
    config: &ResolutionConfig,
) -> Result<Resolution, AppError> {
    if reference.trim().is_empty() {
        return Err(AppError::Validation("Model reference cannot be empty".to_string()));
    }

    if let Some(model) = models
        .iter()
        .find(|m| m.enabled && (m.id == reference || m.value == reference))
    {
        let provider = model.provider.to_lowercase();
        if !providers.contains(&provider) {
            return Err(AppError::resolution(format!(
                "Provider '{}' for model '{}' is not registered",
                provider, reference
            )));
        }

        tracing::debug!(reference, provider = %provider, wire_model = %model.value, "Resolved model from catalog");
        return Ok(Resolution {
            provider,
            wire_model: model.value.clone(),
            catalog_id: Some(model.id.clone()),
        });
    }

    if models
        .iter()
        .any(|m| !m.enabled && (m.id == reference || m.value == reference))
    {
        return Err(AppError::resolution(format!("Model '{}' is disabled", reference)));
    }

    if config.strict {
        return Err(AppError::resolution(format!("Model '{}' is not in the catalog", reference)));
    }

    let fallback = config
        .fallback_provider
        .as_deref()
        .map(str::to_lowercase)
        .filter(|name| providers.contains(name))
        .or_else(|| providers.provider_names().into_iter().next())
        .ok_or_else(|| {
            AppError::resolution(format!("No provider available for model '{}'", reference))
        })?;

    tracing::info!(reference, provider = %fallback, "Model not in catalog, using fallback provider");
    Ok(Resolution {
        provider: fallback,
        wire_model: reference.to_string(),
        catalog_id: None,
    })
}
