//! PostgreSQL services: the upstream image and the Supabase distribution.

use testbed_core::{ContainerSpec, PortBinding};

use crate::generic::GenericService;
use crate::probe::{AllOf, ExecProbe, TcpProbe};
use crate::runner::ContainerOpts;

pub const POSTGRES_IMAGE: (&str, &str) = ("postgres", "13.1");
pub const SUPABASE_IMAGE: (&str, &str) = ("supabase/postgres", "15.6.1.121");

/// Superuser baked into the Supabase image.
pub const SUPABASE_USER: &str = "postgres";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresOpts {
    pub container_name: String,
    /// Network to join instead of the group network.
    pub network: Option<String>,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    /// Host the published port is reachable on (see
    /// [`external_host`](testbed_core::external_host)).
    pub external_host: String,
    pub external_port: u16,
    pub internal_port: u16,
}

/// Upstream `postgres` image.
///
/// Ready once the published port accepts connections and `pg_isready`
/// succeeds inside the container.
pub fn postgres(opts: PostgresOpts) -> GenericService {
    let mut spec = ContainerSpec::new(POSTGRES_IMAGE.0, POSTGRES_IMAGE.1);
    spec.name = Some(opts.container_name.clone());
    spec.network = opts.network.clone();
    spec.ports
        .push(PortBinding::new(opts.external_port, opts.internal_port));
    for (key, value) in [
        ("POSTGRES_DB", opts.db_name.clone()),
        ("POSTGRES_USER", opts.db_user.clone()),
        ("POSTGRES_PASSWORD", opts.db_password.clone()),
        ("POSTGRES_PORT", opts.internal_port.to_string()),
    ] {
        spec.env.insert(key.to_string(), value);
    }

    let probe = readiness(&opts, &opts.db_user);
    GenericService::new(
        opts.container_name,
        ContainerOpts::new(spec).with_probe(probe),
    )
}

/// `supabase/postgres`, which always runs as [`SUPABASE_USER`].
///
/// `opts.db_user` is ignored.
pub fn supabase_postgres(opts: PostgresOpts) -> GenericService {
    let mut spec = ContainerSpec::new(SUPABASE_IMAGE.0, SUPABASE_IMAGE.1);
    spec.name = Some(opts.container_name.clone());
    spec.network = opts.network.clone();
    spec.ports
        .push(PortBinding::new(opts.external_port, opts.internal_port));
    let port = opts.internal_port.to_string();
    for (key, value) in [
        ("POSTGRES_PORT", port.clone()),
        ("PGPORT", port),
        ("POSTGRES_DB", opts.db_name.clone()),
        ("PGDATABASE", opts.db_name.clone()),
        ("POSTGRES_PASSWORD", opts.db_password.clone()),
        ("PGPASSWORD", opts.db_password.clone()),
    ] {
        spec.env.insert(key.to_string(), value);
    }

    let probe = readiness(&opts, SUPABASE_USER);
    GenericService::new(
        opts.container_name,
        ContainerOpts::new(spec).with_probe(probe),
    )
}

fn readiness(opts: &PostgresOpts, user: &str) -> AllOf {
    let port = opts.internal_port.to_string();
    AllOf(vec![
        Box::new(TcpProbe::new(opts.external_host.clone(), opts.external_port)),
        Box::new(ExecProbe::new([
            "pg_isready",
            "-h",
            "127.0.0.1",
            "-p",
            port.as_str(),
            "-U",
            user,
            "-d",
            opts.db_name.as_str(),
        ])),
    ])
}
