use envconfig::Envconfig;

/// Bind address shared by every subcommand that opens a port. `serve-api` and
/// `serve-all` mount the Job Status API on it; `serve-worker` mounts only
/// `/metrics` and the health routes.
#[derive(Envconfig, Clone)]
pub struct BindConfig {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,
    #[envconfig(from = "BIND_PORT", default = "3400")]
    pub port: u16,
}

impl BindConfig {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Object storage connection details, loaded independently of `job_api::Config`
/// so `serve-worker` can build the same client without depending on the
/// façade's HTTP-only fields.
#[derive(Envconfig, Clone)]
pub struct ObjectStoreEnvConfig {
    #[envconfig(from = "OBJECT_STORE_BUCKET", default = "calyx-calendars")]
    pub bucket: String,
    #[envconfig(from = "OBJECT_STORE_REGION", default = "us-east-1")]
    pub region: String,
    #[envconfig(from = "OBJECT_STORE_ENDPOINT")]
    pub endpoint: Option<String>,
    #[envconfig(from = "OBJECT_STORE_ACCESS_KEY")]
    pub access_key: Option<String>,
    #[envconfig(from = "OBJECT_STORE_SECRET_KEY")]
    pub secret_key: Option<String>,
    #[envconfig(from = "OBJECT_STORE_FORCE_PATH_STYLE", default = "true")]
    pub force_path_style: bool,
}

impl ObjectStoreEnvConfig {
    pub fn to_object_store_config(&self) -> object_store::ObjectStoreConfig {
        object_store::ObjectStoreConfig {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            access_key_id: self.access_key.clone(),
            secret_access_key: self.secret_key.clone(),
            force_path_style: self.force_path_style,
        }
    }
}
