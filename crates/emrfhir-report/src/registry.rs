//! 处理器注册表
//!
//! 服务类别到处理器实例的映射，进程启动时构建一次。
//! 按类型名注册通过编译期登记的构造函数完成。

use crate::config::OrderTypeHandlerMap;
use crate::handler::{DefaultHandler, LaboratoryHandler, ReportContext, ReportHandler};
use emrfhir_core::{ReportError, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// 处理器构造函数
pub type HandlerFactory = fn(Arc<ReportContext>) -> Arc<dyn ReportHandler>;

fn laboratory_handler(context: Arc<ReportContext>) -> Arc<dyn ReportHandler> {
    Arc::new(LaboratoryHandler::new(context))
}

fn default_handler(context: Arc<ReportContext>) -> Arc<dyn ReportHandler> {
    Arc::new(DefaultHandler::new(context))
}

/// 服务类别到处理器的注册表
pub struct HandlerRegistry {
    context: Arc<ReportContext>,
    factories: HashMap<&'static str, HandlerFactory>,
    handlers: RwLock<HashMap<String, Arc<dyn ReportHandler>>>,
}

impl HandlerRegistry {
    /// 创建空注册表，内置处理器类型已登记
    pub fn new(context: Arc<ReportContext>) -> Self {
        let mut factories: HashMap<&'static str, HandlerFactory> = HashMap::new();
        factories.insert("LaboratoryHandler", laboratory_handler);
        factories.insert("DefaultHandler", default_handler);

        Self {
            context,
            factories,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// 按配置中的 `handlers` 注册处理器
    pub fn from_config(context: Arc<ReportContext>) -> Result<Self> {
        let registry = Self::new(context);
        let entries = OrderTypeHandlerMap::parse(&registry.context.config.handlers)?;
        for (key, type_name) in entries.iter() {
            registry.register_type(key, type_name)?;
        }
        Ok(registry)
    }

    /// 登记处理器类型，只应在启动阶段调用
    pub fn register_factory(&mut self, type_name: &'static str, factory: HandlerFactory) {
        self.factories.insert(type_name, factory);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn ReportHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// 当前注册的所有处理器
    pub fn handlers(&self) -> HashMap<String, Arc<dyn ReportHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 替换全部处理器，每个处理器按自身的服务类别注册
    pub fn set_all<I>(&self, handlers: I)
    where
        I: IntoIterator<Item = Arc<dyn ReportHandler>>,
    {
        let mut map = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        map.clear();
        for handler in handlers {
            map.insert(handler.service_category().to_string(), handler);
        }
        info!("Replaced report handlers, {} registered", map.len());
    }

    /// 注册处理器，同名时替换
    pub fn register(&self, key: &str, handler: Arc<dyn ReportHandler>) {
        info!(
            "Registering report handler {} for {}",
            handler.service_category(),
            key
        );
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), handler);
    }

    /// 按类型名注册处理器
    pub fn register_type(&self, key: &str, type_name: &str) -> Result<()> {
        let factory = self.factories.get(type_name).ok_or_else(|| {
            ReportError::Configuration(format!(
                "unable to load and instantiate handler '{}'",
                type_name
            ))
        })?;
        self.register(key, factory(self.context.clone()));
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Arc<dyn ReportHandler>> {
        let removed = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if removed.is_some() {
            info!("Removed report handler for {}", key);
        }
        removed
    }

    pub fn context(&self) -> &Arc<ReportContext> {
        &self.context
    }
}
