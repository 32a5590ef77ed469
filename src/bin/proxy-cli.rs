use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Map, Value};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the MCP workload gateway", long_about = None)]
struct Cli {
    #[arg(short, long, env = "MCP_GATEWAY_URL", default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "MCP_GATEWAY_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// Start an MCP server behind a proxy
    Run(RunArgs),
    /// Stop a workload, keeping its record
    Stop { name: String },
    /// Delete one or more workloads
    Rm {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// List workloads
    List,
    /// Manage groups
    #[command(subcommand)]
    Group(GroupCommands),
}

#[derive(Subcommand)]
enum GroupCommands {
    /// Create a group
    Create { name: String },
    /// List groups
    Ls,
    /// Delete a group and every workload in it
    Rm { name: String },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Workload name
    name: String,

    /// Executable to run
    command: String,

    /// Arguments passed to the executable (after `--`)
    #[arg(last = true)]
    args: Vec<String>,

    /// stdio, sse or streamable-http
    #[arg(short, long, default_value = "stdio")]
    transport: String,

    /// How a stdio server is exposed: sse or streamable-http
    #[arg(long)]
    proxy_mode: Option<String>,

    #[arg(short, long)]
    group: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    proxy_port: Option<u16>,

    #[arg(long)]
    target_host: Option<String>,

    #[arg(long)]
    target_port: Option<u16>,

    /// KEY=VALUE, repeatable
    #[arg(short, long = "env", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Middleware for the default chain, repeatable, outermost first
    #[arg(short, long = "middleware")]
    middlewares: Vec<String>,

    #[arg(long)]
    debug: bool,
}

fn parse_env(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw}"))
}

impl RunArgs {
    fn body(self) -> Value {
        let mut body = Map::new();
        body.insert("name".into(), json!(self.name));
        body.insert("command".into(), json!(self.command));
        body.insert("args".into(), json!(self.args));
        body.insert("transport".into(), json!(self.transport));
        body.insert("debug".into(), json!(self.debug));
        body.insert("middlewares".into(), json!(self.middlewares));
        body.insert(
            "env".into(),
            Value::Object(self.env.into_iter().map(|(k, v)| (k, json!(v))).collect()),
        );

        let optional = [
            ("proxy_mode", self.proxy_mode.map(Value::from)),
            ("group", self.group.map(Value::from)),
            ("host", self.host.map(Value::from)),
            ("proxy_port", self.proxy_port.map(Value::from)),
            ("target_host", self.target_host.map(Value::from)),
            ("target_port", self.target_port.map(Value::from)),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                body.insert(key.into(), value);
            }
        }
        Value::Object(body)
    }
}

struct Admin {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
}

impl Admin {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.url.trim_end_matches('/'), path))
            .headers(self.headers.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let admin = Admin {
        client: reqwest::Client::new(),
        url: cli.url,
        headers,
    };

    let request = match cli.command {
        Commands::Status => admin.request(Method::GET, "/admin/status"),
        Commands::Run(args) => admin.request(Method::POST, "/admin/workloads").json(&args.body()),
        Commands::Stop { name } => admin.request(Method::POST, &format!("/admin/workloads/{name}/stop")),
        Commands::Rm { names } if names.len() == 1 => {
            admin.request(Method::DELETE, &format!("/admin/workloads/{}", names[0]))
        }
        Commands::Rm { names } => admin
            .request(Method::DELETE, "/admin/workloads")
            .json(&json!({ "names": names })),
        Commands::List => admin.request(Method::GET, "/admin/workloads"),
        Commands::Group(GroupCommands::Create { name }) => admin
            .request(Method::POST, "/admin/groups")
            .json(&json!({ "name": name })),
        Commands::Group(GroupCommands::Ls) => admin.request(Method::GET, "/admin/groups"),
        Commands::Group(GroupCommands::Rm { name }) => {
            admin.request(Method::DELETE, &format!("/admin/groups/{name}"))
        }
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        return Err(format!("request failed with status {status}").into());
    }

    if text.is_empty() {
        println!("OK");
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
