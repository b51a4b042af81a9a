//! 路由分类表：公开路径、受保护前缀与静态资源旁路。

use crate::config::{Args, INTERNAL_PATH_PREFIX, split_list};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteClass {
    Public,
    Protected,
    Unclassified,
}

/// 每个请求都按此表重新分类，无状态。
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    pub public_paths: Vec<String>,
    pub auth_pages: Vec<String>,
    pub protected_prefixes: Vec<String>,
    pub bypass_prefixes: Vec<String>,
    pub bypass_extensions: Vec<String>,
}

impl RouteTable {
    pub fn from_args(args: &Args) -> Self {
        Self {
            public_paths: split_list(&args.public_paths),
            auth_pages: split_list(&args.auth_pages),
            protected_prefixes: split_list(&args.protected_prefixes),
            bypass_prefixes: split_list(&args.bypass_prefixes),
            bypass_extensions: split_list(&args.bypass_extensions)
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect(),
        }
    }

    /// 公开路径精确匹配优先于受保护前缀。
    pub fn classify(&self, path: &str) -> RouteClass {
        if self.public_paths.iter().any(|public| public == path) {
            return RouteClass::Public;
        }
        if self
            .protected_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return RouteClass::Protected;
        }
        RouteClass::Unclassified
    }

    /// 登录/注册页：已登录用户访问时跳转落地页。
    pub fn is_auth_page(&self, path: &str) -> bool {
        self.auth_pages.iter().any(|page| page == path)
    }

    /// 网关内部端点与静态资源不经过凭证检查。
    pub fn is_bypassed(&self, path: &str) -> bool {
        if path == INTERNAL_PATH_PREFIX || path.starts_with(&format!("{INTERNAL_PATH_PREFIX}/")) {
            return true;
        }
        if self
            .bypass_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return true;
        }
        let Some(last_segment) = path.rsplit('/').next() else {
            return false;
        };
        let Some((_, extension)) = last_segment.rsplit_once('.') else {
            return false;
        };
        // 区分大小写：`/dashboard/x.PNG` 仍需检查凭证。
        self.bypass_extensions.iter().any(|ext| ext == extension)
    }
}
