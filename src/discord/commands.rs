//! Slash commands (`/<name> attach <target>`, `/<name> detach`).

use std::sync::Arc;

use serenity::all::{
    ChannelType, Command, CommandInteraction, CommandOptionType, CreateCommand,
    CreateCommandOption, CreateInteractionResponse, CreateInteractionResponseMessage,
    EditInteractionResponse, Http, ResolvedOption, ResolvedValue,
};
use tracing::{debug, info, warn};

use crate::bridge::{IntegrationCommand, RelayAdapter, run_command};

const CHANNEL_ONLY: &str = "This command can only be used in a channel.";

/// Definition of the command group.
pub fn build_command(name: &str) -> CreateCommand {
    CreateCommand::new(name)
        .description("Manage the link with an IKA IRC network channel")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "attach",
                "Link this channel with an IKA IRC network channel",
            )
            .add_sub_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "target",
                    "IKA IRC network channel name",
                )
                .required(true),
            ),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::SubCommand,
            "detach",
            "Remove the link with the IKA IRC network channel",
        ))
}

/// Register the command group globally.
pub async fn register(http: &Arc<Http>, name: &str) -> serenity::Result<()> {
    let command = Command::create_global_command(http, build_command(name)).await?;
    info!("Registered slash command /{} ({})", command.name, command.id);
    Ok(())
}

/// Map a subcommand name and its `target` option to a command.
pub fn to_command(subcommand: &str, target: Option<&str>) -> Option<IntegrationCommand> {
    match (subcommand, target) {
        ("attach", Some(target)) if !target.trim().is_empty() => Some(IntegrationCommand::Attach {
            irc_channel: target.trim().to_string(),
        }),
        ("detach", _) => Some(IntegrationCommand::Detach),
        _ => None,
    }
}

fn parse_options(options: &[ResolvedOption<'_>]) -> Option<IntegrationCommand> {
    let option = options.first()?;
    let ResolvedValue::SubCommand(sub_options) = &option.value else {
        return None;
    };

    let target = sub_options.iter().find_map(|sub| match (sub.name, &sub.value) {
        ("target", ResolvedValue::String(value)) => Some(*value),
        _ => None,
    });

    to_command(option.name, target)
}

/// Handle one slash command invocation.
pub async fn handle_command(
    http: &Arc<Http>,
    adapter: &dyn RelayAdapter,
    command_name: &str,
    interaction: CommandInteraction,
) {
    if interaction.data.name != command_name {
        debug!("Ignoring unknown command /{}", interaction.data.name);
        return;
    }

    let in_text_channel = interaction.guild_id.is_some()
        && interaction
            .channel
            .as_ref()
            .map_or(true, |channel| channel.kind == ChannelType::Text);

    if !in_text_channel {
        let reply = CreateInteractionResponseMessage::new().content(CHANNEL_ONLY);
        if let Err(e) = interaction
            .create_response(http, CreateInteractionResponse::Message(reply))
            .await
        {
            warn!("Failed to answer /{}: {}", command_name, e);
        }
        return;
    }

    let Some(command) = parse_options(&interaction.data.options()) else {
        debug!("Malformed /{} invocation", command_name);
        return;
    };

    // Webhook and bus calls can exceed the interaction deadline.
    if let Err(e) = interaction.defer(http).await {
        warn!("Failed to defer /{}: {}", command_name, e);
        return;
    }

    let target = interaction.channel_id.get().to_string();
    let reply = run_command(adapter, &target, command).await;

    if let Err(e) = interaction
        .edit_response(http, EditInteractionResponse::new().content(reply))
        .await
    {
        warn!("Failed to answer /{}: {}", command_name, e);
    }
}
