use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use abac_sql::ast::{parse_expression, Expr};
use abac_sql::attribute::Claims;
use abac_sql::config::SchemaConfig;
use abac_sql::query::{compile_query_with, parse_query, Query};
use abac_sql::{CollectorRegistry, Predicate, SqlCompiler};

/// 访问规则到 SQL 谓词的编译器
#[derive(Parser)]
#[command(name = "abac-sql", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 编译策略文件并输出 SQL 与参数
    Compile(CompileArgs),
    /// 只做结构校验
    Check(CheckArgs),
    /// 列出已注册的根
    Roots(SchemaArgs),
    /// 交互模式，每行一个 JSON 文档
    Repl(ReplArgs),
}

#[derive(Args)]
struct SchemaArgs {
    /// 绑定配置文件，缺省使用内置绑定
    #[arg(long)]
    schema: Option<PathBuf>,
}

#[derive(Args)]
struct CompileArgs {
    /// 策略文件（表达式或 `{"Query": ...}` 文档）
    policy: PathBuf,

    /// 根标识，例如 `$aasdesc`
    #[arg(short, long)]
    root: String,

    /// 调用方声明（claims）的 JSON 文件
    #[arg(long)]
    claims: Option<PathBuf>,

    /// 输出内联参数后的 SQL
    #[arg(long)]
    inline: bool,

    #[command(flatten)]
    schema: SchemaArgs,
}

#[derive(Args)]
struct CheckArgs {
    /// 策略文件
    policy: PathBuf,
}

#[derive(Args)]
struct ReplArgs {
    /// 初始根标识
    #[arg(short, long, default_value = "$aasdesc")]
    root: String,

    #[arg(long)]
    claims: Option<PathBuf>,

    #[command(flatten)]
    schema: SchemaArgs,
}

/// 输入文档：单个表达式或带子过滤器的查询
enum Document {
    Expr(Expr),
    Query(Query),
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "abac_sql=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile(args) => run_compile(&args),
        Commands::Check(args) => run_check(&args),
        Commands::Roots(args) => run_roots(&args),
        Commands::Repl(args) => run_repl(&args),
    }
}

/// 加载绑定注册表，优先使用配置文件
fn load_registry(args: &SchemaArgs) -> Result<CollectorRegistry> {
    let config = match &args.schema {
        Some(path) => {
            let config = SchemaConfig::from_json_file(path)?;
            info!(path = %path.display(), roots = config.roots.len(), "Loaded schema configuration");
            config
        }
        None => SchemaConfig::builtin(),
    };
    Ok(CollectorRegistry::from_config(&config)?)
}

fn load_claims(path: Option<&Path>) -> Result<Claims> {
    let Some(path) = path else {
        return Ok(Claims::new());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("无法读取 claims 文件 {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("无法解析 claims 文件 {}", path.display()))
}

fn parse_document(bytes: &[u8]) -> Result<Document> {
    let value: serde_json::Value = serde_json::from_slice(bytes).context("文档不是合法的 JSON")?;
    if value.get("Query").is_some() {
        Ok(Document::Query(parse_query(bytes)?))
    } else {
        Ok(Document::Expr(parse_expression(bytes)?))
    }
}

fn read_document(path: &Path) -> Result<Document> {
    let bytes = fs::read(path).with_context(|| format!("无法读取策略文件 {}", path.display()))?;
    parse_document(&bytes).with_context(|| format!("策略文件无效: {}", path.display()))
}

fn compile_document(compiler: &SqlCompiler<'_>, document: &Document) -> Result<Predicate> {
    let predicate = match document {
        Document::Expr(expr) => compiler.evaluate(expr)?,
        Document::Query(query) => compile_query_with(query, compiler)?,
    };
    Ok(predicate)
}

fn print_predicate(predicate: &Predicate, inline: bool) {
    if inline {
        println!("{}", predicate.to_sql());
        return;
    }
    let (sql, values) = predicate.build();
    println!("{sql}");
    for (i, value) in values.0.iter().enumerate() {
        println!("  ${} = {:?}", i + 1, value);
    }
}

fn run_compile(args: &CompileArgs) -> Result<()> {
    let registry = load_registry(&args.schema)?;
    let collector = registry.get(&args.root)?;
    let claims = load_claims(args.claims.as_deref())?;
    let document = read_document(&args.policy)?;

    let compiler = SqlCompiler::new(collector).with_attributes(&claims);
    let predicate = compile_document(&compiler, &document)
        .with_context(|| format!("编译失败: {}", args.policy.display()))?;
    print_predicate(&predicate, args.inline);
    Ok(())
}

fn run_check(args: &CheckArgs) -> Result<()> {
    match read_document(&args.policy)? {
        Document::Expr(expr) => println!("✅ 表达式有效，根节点 {}，引用 {} 个字段", expr.key(), expr.fields().len()),
        Document::Query(query) => println!("✅ 查询有效，包含 {} 个子过滤器", query.filters.len()),
    }
    Ok(())
}

fn run_roots(args: &SchemaArgs) -> Result<()> {
    let registry = load_registry(args)?;
    for root in registry.roots() {
        let collector = registry.get(root)?;
        println!(
            "{root} -> {} AS {} (key {})",
            collector.table(),
            collector.alias(),
            collector.key_column()
        );
    }
    Ok(())
}

fn run_repl(args: &ReplArgs) -> Result<()> {
    let registry = load_registry(&args.schema)?;
    let claims = load_claims(args.claims.as_deref())?;
    let mut root = args.root.clone();
    registry.get(&root)?;

    println!("--- abac-sql 交互模式 ---");
    println!("输入 JSON 表达式或查询；`:root <token>` 切换根，`:quit` 退出");

    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline(&format!("{root}> ")) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line)?;

                if line == ":quit" {
                    break;
                }
                if let Some(token) = line.strip_prefix(":root") {
                    let token = token.trim();
                    match registry.get(token) {
                        Ok(_) => root = token.to_string(),
                        Err(e) => println!("❌ {e}"),
                    }
                    continue;
                }

                let result = registry.get(&root).map_err(anyhow::Error::from).and_then(|collector| {
                    let compiler = SqlCompiler::new(collector).with_attributes(&claims);
                    compile_document(&compiler, &parse_document(line.as_bytes())?)
                });
                match result {
                    Ok(predicate) => print_predicate(&predicate, false),
                    Err(e) => println!("❌ {e:#}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => bail!("读取输入失败: {e}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document_detects_envelope() {
        let expr = parse_document(br#"{"$boolean": true}"#).unwrap();
        assert!(matches!(expr, Document::Expr(Expr::Boolean(true))));

        let query = parse_document(br#"{"Query": {"$condition": {"$boolean": false}}}"#).unwrap();
        assert!(matches!(query, Document::Query(_)));

        assert!(parse_document(b"not json").is_err());
    }

    #[test]
    fn test_compile_document() {
        let registry = CollectorRegistry::builtin().unwrap();
        let compiler = SqlCompiler::new(registry.get("$bd").unwrap());
        let document =
            parse_document(br#"{"$eq": [{"$field": "$bd#aasId"}, {"$strVal": "urn:aas:1"}]}"#).unwrap();
        let (sql, values) = compile_document(&compiler, &document).unwrap().build();
        assert!(sql.contains(r#""aas_identifier"."aasid" = $1"#));
        assert_eq!(values.0.len(), 1);
    }
}
