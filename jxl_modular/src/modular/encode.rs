// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use super::{
    GroupHeader, ModularChannel, ModularImage, ModularOptions,
    learn::{PixelStatistics, TreeSamples, gather_image_data, learn_tree},
    predict_channel::predict_channel,
    tree::{Tree, tokenize_tree},
};
use crate::{
    entropy_coding::{HybridUintConfig, Token, TokenWriter, write_tokens},
    error::{Error, Result},
    image::Image,
    util::{NewWithCapacity, map_items, tracing_wrappers::*},
};

/// Learns a tree for all channels of `image` in group `header.group_id`.
#[instrument(level = "debug", skip_all, err)]
pub fn learn_image_tree(
    image: &ModularImage,
    header: &GroupHeader,
    options: &ModularOptions,
) -> Result<Tree> {
    let channels = image.channels()?;
    let nb_meta_channels = image.nb_meta_channels();
    let mut samples = TreeSamples::new(options)?;
    let mut stats = PixelStatistics::default();
    stats.collect(channels, nb_meta_channels, header.group_id, options);
    let static_prop_range = [
        [0, channels.len() as u32],
        [header.group_id, header.group_id.saturating_add(1)],
    ];
    samples.pre_quantize_properties(
        &static_prop_range,
        &[],
        stats,
        options.max_property_values,
    );
    let total_pixels = gather_image_data(
        channels,
        nb_meta_channels,
        header.group_id,
        &header.wp_header,
        options,
        &mut samples,
    )?;
    learn_tree(samples, total_pixels, options, &[], static_prop_range)
}

/// Computes the residual tokens of channel `chan`, one per pixel in scan
/// order, each in the context of its leaf. Residuals are divided by the
/// leaf multiplier, which must divide them.
#[instrument(level = "debug", skip(channels, header, tree), err)]
pub fn encode_channel(
    channels: &[ModularChannel],
    chan: usize,
    header: &GroupHeader,
    tree: &Tree,
) -> Result<Vec<Token>> {
    let channel = channels
        .get(chan)
        .ok_or(Error::InvalidChannelRange(chan, chan + 1, channels.len()))?;
    let (w, h) = channel.size();
    let mut tokens = Vec::new_with_capacity(w * h)?;
    let mut out = Image::new((w, h))?;
    predict_channel(channels, chan, header, tree, &mut out, |leaf, guess, (x, y)| {
        let value = channel.data.get(x, y);
        let residual = value as i64 - guess;
        let multiplier = leaf.multiplier as i64;
        if residual % multiplier != 0 {
            return Err(Error::ResidualNotMultiple(residual, leaf.multiplier));
        }
        let residual =
            i32::try_from(residual / multiplier).map_err(|_| Error::ArithmeticOverflow)?;
        tokens.push(Token::new_signed(leaf.context as usize, residual));
        Ok(value)
    })?;
    Ok(tokens)
}

/// Computes the residual tokens of every channel. Channels are independent
/// unless the tree references previous channels, and are then encoded in
/// parallel.
pub fn encode_channels(
    channels: &[ModularChannel],
    header: &GroupHeader,
    tree: &Tree,
) -> Result<Vec<Vec<Token>>> {
    let indices: Vec<usize> = (0..channels.len()).collect();
    if tree.num_prev_channels() == 0 {
        map_items(&indices, |&chan| encode_channel(channels, chan, header, tree))
            .into_iter()
            .collect()
    } else {
        indices
            .iter()
            .map(|&chan| encode_channel(channels, chan, header, tree))
            .collect()
    }
}

/// Learns a tree for `image` and writes it, followed by the residuals of
/// every channel, to `writer`. Returns the tree.
#[instrument(level = "debug", skip_all, err)]
pub fn encode_image(
    image: &ModularImage,
    header: &GroupHeader,
    options: &ModularOptions,
    writer: &mut impl TokenWriter,
) -> Result<Tree> {
    let tree = learn_image_tree(image, header, options)?;
    let config = HybridUintConfig::default();
    write_tokens(writer, &config, &tokenize_tree(&tree));
    let tokens = encode_channels(image.channels()?, header, &tree)?;
    debug!(
        leaves = tree.num_leaves(),
        residuals = tokens.iter().map(Vec::len).sum::<usize>(),
        "encoded image"
    );
    for channel_tokens in tokens.iter() {
        write_tokens(writer, &config, channel_tokens);
    }
    Ok(tree)
}

#[cfg(test)]
mod test {
    use rand::SeedableRng;
    use test_log::test;

    use super::{encode_channel, encode_channels, learn_image_tree};
    use crate::{
        entropy_coding::Token,
        error::{Error, Result},
        image::Image,
        modular::{
            GroupHeader, ModularChannel, ModularImage, ModularOptions, Predictor, PredictorChoice,
            Tree,
            tree::{Leaf, TreeBuilder},
        },
        util::test::random_channel,
    };

    fn channel(size: (usize, usize), values: Vec<i32>) -> Result<ModularChannel> {
        Ok(ModularChannel::from_image(Image::from_vec(size, values)?))
    }

    #[test]
    fn residuals_are_divided_by_multiplier() -> Result<()> {
        let tree = Tree::single_leaf(Predictor::Zero, 0, 2)?;
        let channels = vec![channel((3, 1), vec![2, 4, -6])?];
        let tokens = encode_channel(&channels, 0, &GroupHeader::default(), &tree)?;
        assert_eq!(
            tokens,
            vec![
                Token::new_signed(0, 1),
                Token::new_signed(0, 2),
                Token::new_signed(0, -3)
            ]
        );

        let channels = vec![channel((1, 1), vec![3])?];
        assert!(matches!(
            encode_channel(&channels, 0, &GroupHeader::default(), &tree),
            Err(Error::ResidualNotMultiple(3, 2))
        ));
        Ok(())
    }

    #[test]
    fn residual_overflow() -> Result<()> {
        let tree = Tree::single_leaf(Predictor::Zero, 1, 1)?;
        let channels = vec![channel((1, 1), vec![i32::MIN])?];
        assert!(matches!(
            encode_channel(&channels, 0, &GroupHeader::default(), &tree),
            Err(Error::ArithmeticOverflow)
        ));
        Ok(())
    }

    #[test]
    fn offsets_and_contexts() -> Result<()> {
        // West for channel 0, North with offset 1 for the others.
        let mut builder = TreeBuilder::new(Leaf::new(Predictor::Zero));
        let north = Leaf {
            offset: 1,
            ..Leaf::new(Predictor::North)
        };
        builder.split(0, 0, 0, north, Leaf::new(Predictor::West))?;
        let tree = builder.build()?;
        let data = vec![5, 7, 6, 9];
        let channels = vec![channel((2, 2), data.clone())?, channel((2, 2), data)?];
        let tokens = encode_channels(&channels, &GroupHeader::default(), &tree)?;
        // West: guesses 0, 5, 5 (left falls back to top), 6.
        assert_eq!(
            tokens[0],
            vec![
                Token::new_signed(1, 5),
                Token::new_signed(1, 2),
                Token::new_signed(1, 1),
                Token::new_signed(1, 3)
            ]
        );
        // North + 1: guesses 1, 6 (top falls back to left), 6, 8.
        assert_eq!(
            tokens[1],
            vec![
                Token::new_signed(0, 4),
                Token::new_signed(0, 1),
                Token::new_signed(0, 0),
                Token::new_signed(0, 1)
            ]
        );
        Ok(())
    }

    #[test]
    fn parallel_encoding_matches_sequential() -> Result<()> {
        let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(6);
        let channels = (0..4)
            .map(|_| random_channel(&mut rng, (10, 7), 0..=255))
            .collect::<Result<Vec<_>>>()?;
        let image = ModularImage::new(channels, 8)?;
        let options = ModularOptions {
            predictor: PredictorChoice::Variable,
            ..Default::default()
        };
        let header = options.group_header(3)?;
        let tree = learn_image_tree(&image, &header, &options)?;
        let channels = image.channels()?;
        let parallel = encode_channels(channels, &header, &tree)?;
        assert_eq!(parallel.len(), 4);
        for (chan, tokens) in parallel.iter().enumerate() {
            assert_eq!(tokens.len(), 70);
            assert_eq!(*tokens, encode_channel(channels, chan, &header, &tree)?);
        }
        Ok(())
    }
}
