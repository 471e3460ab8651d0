use crate::utils;
use colored::Colorize;
use serde_json::json;
use stackflow_cloud_local::{Trigger, asset_parameters, register_onboarding_handlers};
use stackflow_synth::{logical_id, nested_logical_id};

const USERNAME: &str = "simulated-user";
const PASSWORD: &str = "Sim-Passw0rd!";

/// サンドボックスにデプロイし、サインアップから顧客プロビジョニングまでを流す
pub fn handle(stage: Option<String>, customer: &str) -> anyhow::Result<()> {
    let project = utils::load_project(stage)?;
    let stack_name = project.stack_name();
    let blueprint = &project.blueprint;

    let (pool_key, pool) = blueprint
        .user_pools
        .iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("ユーザープールが宣言されていません"))?;
    let client = pool
        .clients
        .first()
        .ok_or_else(|| anyhow::anyhow!("{} にクライアントがありません", pool_key))?;
    let (api_key, api) = blueprint
        .rest_apis
        .iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("REST API が宣言されていません"))?;
    let method = api
        .methods
        .first()
        .ok_or_else(|| anyhow::anyhow!("{} にメソッドがありません", api_key))?;

    println!("{} {}", "サンドボックスにデプロイ中...".blue(), stack_name.cyan());
    let synthesis = project.synthesize()?;
    let mut sandbox = utils::local_sandbox(&project.settings);
    let parameters = asset_parameters(&synthesis.assets, utils::LOCAL_ASSET_BUCKET);
    let deployed = sandbox.deploy(&stack_name, &synthesis.template.to_json()?, &parameters)?;

    let physical = |logical: String| {
        deployed
            .physical_id(&logical)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("{} がデプロイされていません", logical))
    };
    let pool_id = physical(logical_id(pool_key))?;
    let client_id = physical(nested_logical_id(pool_key, &client.id))?;
    let api_id = physical(logical_id(api_key))?;
    println!("  リソース: {}個", deployed.resources.len());

    register_onboarding_handlers(&mut sandbox);

    println!("{} {}", "サインアップ:".blue(), USERNAME.cyan());
    sandbox.sign_up(
        &client_id,
        USERNAME,
        PASSWORD,
        &[
            ("email", "simulated@example.com"),
            ("given_name", "Simulated"),
            ("family_name", "User"),
        ],
    )?;
    sandbox.admin_confirm_sign_up(&pool_id, USERNAME)?;
    let auth = sandbox.admin_initiate_auth(&pool_id, &client_id, USERNAME, PASSWORD)?;

    println!(
        "{} {} {}",
        "リクエスト:".blue(),
        method.http_method,
        method.path
    );
    let body = json!({
        "customerName": customer,
        "email": format!("admin@{}.example", customer),
        "givenName": "Ada",
        "familyName": "Lovelace",
        "region": project.settings.region,
    })
    .to_string();
    let response = sandbox.invoke_api(
        &api_id,
        &api.stage_name,
        &method.http_method,
        &method.path,
        &[("Authorization", auth.id_token.as_str())],
        Some(&body),
    )?;
    println!("  {} {}", response.status, response.body);
    if !response.is_success() {
        anyhow::bail!("リクエストが失敗しました（ステータス {}）", response.status);
    }

    let processed = sandbox.run_until_idle();
    println!("{} {}件のイベントを処理", "非同期処理:".blue(), processed);

    println!();
    println!("{}", "呼び出し履歴:".bold());
    for invocation in sandbox.invocations() {
        let trigger = match &invocation.trigger {
            Trigger::Direct => "direct".to_string(),
            Trigger::Api { method, path, .. } => format!("api {} {}", method, path),
            Trigger::Stream { records, .. } => format!("stream {} records", records),
            Trigger::Topic { message_id, .. } => format!("topic {}", message_id),
        };
        let status = match &invocation.result {
            Ok(_) => "✓".green(),
            Err(_) => "✗".red(),
        };
        println!("  {} {} ({})", status, invocation.function_name.cyan(), trigger);
        if let Err(e) = &invocation.result {
            println!("      {}", e.red());
        }
    }

    let failures = sandbox.delivery_failures().len();
    println!();
    println!("  発行メッセージ: {}件", sandbox.published_messages().len());
    if failures > 0 {
        println!("  {} 配信失敗: {}件", "⚠".yellow(), failures);
    }

    let admin = format!("{}-admin", customer);
    match sandbox.user_pool(&pool_id).and_then(|p| p.users.get(&admin)) {
        Some(user) => println!(
            "{} {} ({})",
            "✓ 管理ユーザーを作成しました:".green().bold(),
            admin.cyan(),
            user.groups.iter().cloned().collect::<Vec<_>>().join(", ")
        ),
        None => anyhow::bail!("{} が作成されませんでした", admin),
    }
    Ok(())
}
