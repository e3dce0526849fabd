//! Slack Block Kit message builders.

use slack_morphism::prelude::{
    SlackActionBlockElement, SlackActionsBlock, SlackBlock, SlackBlockButtonElement,
    SlackBlockButtonStyle, SlackBlockId, SlackBlockPlainTextOnly, SlackBlockText,
    SlackSectionBlock,
};

use super::gateway::MessageButton;

/// Build a plain mrkdwn section block.
#[must_use]
pub fn text_section(text: &str) -> SlackBlock {
    SlackBlock::Section(SlackSectionBlock::new().with_text(SlackBlockText::MarkDown(text.into())))
}

/// Build an actions block with the given buttons.
///
/// Well-known affirmative options render as primary, negative as danger.
#[must_use]
pub fn action_buttons(block_id: &str, buttons: &[MessageButton]) -> SlackBlock {
    let elements: Vec<SlackActionBlockElement> = buttons
        .iter()
        .map(|button| {
            let mut element = SlackBlockButtonElement::new(
                button.action_id.clone().into(),
                SlackBlockPlainTextOnly::from(button.label.as_str()),
            )
            .with_value(button.value.clone());
            let lower = button.label.to_lowercase();
            if matches!(lower.as_str(), "allow" | "yes" | "approve") {
                element = element.with_style(SlackBlockButtonStyle::Primary);
            } else if matches!(lower.as_str(), "deny" | "no" | "reject") {
                element = element.with_style(SlackBlockButtonStyle::Danger);
            }
            SlackActionBlockElement::Button(element)
        })
        .collect();
    SlackBlock::Actions(
        SlackActionsBlock::new(elements).with_block_id(SlackBlockId(block_id.into())),
    )
}

/// Blocks for an interactive message: text section plus optional buttons.
#[must_use]
pub fn message_blocks(text: &str, buttons: &[MessageButton]) -> Vec<SlackBlock> {
    let mut blocks = vec![text_section(text)];
    if !buttons.is_empty() {
        blocks.push(action_buttons("actions", buttons));
    }
    blocks
}
